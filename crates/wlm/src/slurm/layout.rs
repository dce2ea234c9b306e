// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `sattach --layout` output parsing.
//!
//! ```text
//! Job step layout:
//!   4 tasks, 2 nodes (nid0000[1-2])
//!
//!   Node 0 (nid00001), 2 task(s): 0 1
//!   Node 1 (nid00002), 2 task(s): 2 3
//! ```

use cti_core::NodeLayout;

use crate::error::WlmError;

/// Placement of one job step (or hetjob component).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLayout {
    pub num_pes: usize,
    pub nodes: Vec<NodeLayout>,
}

impl StepLayout {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

/// Parse the layout listing. `pe_offset` shifts every rank, which is how
/// hetjob components stack into one global PE space.
pub fn parse_step_layout(output: &str, pe_offset: usize) -> Result<StepLayout, WlmError> {
    let mut lines = output.lines();

    let header = lines.next().unwrap_or_default().trim();
    if header != "Job step layout:" {
        return Err(WlmError::Parse {
            tool: "sattach",
            detail: format!(
                "Unexpected layout output: {header:?}. \
                 Try setting CTI_LAUNCHER_NAME to the Slurm launcher path."
            ),
        });
    }

    let summary = lines.next().unwrap_or_default();
    let num_pes: usize = summary
        .split_whitespace()
        .next()
        .and_then(|count| count.parse().ok())
        .ok_or_else(|| WlmError::Parse {
            tool: "sattach",
            detail: format!("no task count in {summary:?}"),
        })?;

    let mut nodes = Vec::new();
    for line in lines {
        let line = line.trim();
        if !line.starts_with("Node ") {
            continue;
        }
        nodes.push(parse_node_line(line, pe_offset)?);
    }

    let placed: usize = nodes.iter().map(|n| n.pes_here as usize).sum();
    if placed != num_pes {
        return Err(WlmError::Parse {
            tool: "sattach",
            detail: format!("layout places {placed} tasks but step has {num_pes}"),
        });
    }

    Ok(StepLayout { num_pes, nodes })
}

/// `Node 1 (nid00002), 2 task(s): 2 3`
fn parse_node_line(line: &str, pe_offset: usize) -> Result<NodeLayout, WlmError> {
    let bad = |detail: String| WlmError::Parse { tool: "sattach", detail };

    let open = line.find('(').ok_or_else(|| bad(format!("no hostname in {line:?}")))?;
    let close = line[open..]
        .find(')')
        .map(|i| open + i)
        .ok_or_else(|| bad(format!("no hostname in {line:?}")))?;
    let hostname = line[open + 1..close].to_string();

    let colon = line.rfind(':').ok_or_else(|| bad(format!("no rank list in {line:?}")))?;
    let ranks: Vec<usize> = line[colon + 1..]
        .split_whitespace()
        .map(|rank| rank.parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad(format!("bad rank list in {line:?}")))?;
    if ranks.is_empty() {
        return Err(bad(format!("empty rank list in {line:?}")));
    }

    let first = ranks.iter().min().copied().unwrap_or(0);
    Ok(NodeLayout {
        hostname,
        pes_here: ranks.len() as i32,
        first_pe: (first + pe_offset) as i32,
    })
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
