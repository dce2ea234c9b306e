// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flux JSON surfaces: the `guest.exec.eventlog`, task maps, and the
//! version listing.

use serde_json::Value;

use crate::error::WlmError;
use crate::hostlist::expand_hostlist;

/// What `shell.init` tells us about a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInit {
    pub leader_rank: u32,
    pub service: String,
}

/// Parse one eventlog line, returning the shell.init payload if this is
/// that event.
pub fn parse_shell_init(line: &str) -> Result<Option<ShellInit>, WlmError> {
    let event: Value = serde_json::from_str(line).map_err(|err| WlmError::Parse {
        tool: "flux",
        detail: format!("bad eventlog entry {line:?}: {err}"),
    })?;
    if event.get("name").and_then(Value::as_str) != Some("shell.init") {
        return Ok(None);
    }
    let context = event.get("context").ok_or_else(|| WlmError::Parse {
        tool: "flux",
        detail: "shell.init event has no context".to_string(),
    })?;
    let leader_rank = context
        .get("leader-rank")
        .and_then(Value::as_u64)
        .ok_or_else(|| WlmError::Parse {
            tool: "flux",
            detail: "shell.init context has no leader-rank".to_string(),
        })? as u32;
    let service = context
        .get("service")
        .and_then(Value::as_str)
        .ok_or_else(|| WlmError::Parse {
            tool: "flux",
            detail: "shell.init context has no service key".to_string(),
        })?
        .to_string();
    if service.is_empty() {
        return Err(WlmError::Parse {
            tool: "flux",
            detail: "Flux returned an empty RPC service key".to_string(),
        });
    }
    Ok(Some(ShellInit { leader_rank, service }))
}

/// Scan a whole eventlog for `shell.init`.
pub fn find_shell_init(eventlog: &str) -> Result<ShellInit, WlmError> {
    for line in eventlog.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(init) = parse_shell_init(line)? {
            return Ok(init);
        }
    }
    Err(WlmError::Parse {
        tool: "flux",
        detail: "eventlog ended without a shell.init event".to_string(),
    })
}

/// Expand an RFC 34 block-form task map (`[[start, nnodes, ppn, reps]]`)
/// against an expanded nodelist into per-node task counts.
pub fn tasks_per_node(taskmap: &str, nodelist: &[String]) -> Result<Vec<(String, usize)>, WlmError> {
    let value: Value = serde_json::from_str(taskmap).map_err(|err| WlmError::Parse {
        tool: "flux",
        detail: format!("bad taskmap {taskmap:?}: {err}"),
    })?;
    // Either raw blocks or {"version":1,"map":[...]}.
    let blocks = value
        .get("map")
        .and_then(Value::as_array)
        .cloned()
        .or_else(|| value.as_array().cloned())
        .ok_or_else(|| WlmError::Parse {
            tool: "flux",
            detail: format!("taskmap {taskmap:?} is not a block list"),
        })?;

    let mut counts = vec![0usize; nodelist.len()];
    for block in &blocks {
        let fields = block.as_array().ok_or_else(|| WlmError::Parse {
            tool: "flux",
            detail: format!("taskmap block {block} is not an array"),
        })?;
        let number = |index: usize| -> Result<usize, WlmError> {
            fields
                .get(index)
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .ok_or_else(|| WlmError::Parse {
                    tool: "flux",
                    detail: format!("taskmap block {block} is malformed"),
                })
        };
        let (start, nnodes, ppn, reps) = (number(0)?, number(1)?, number(2)?, number(3)?);
        for rep in 0..reps {
            for offset in 0..nnodes {
                let node = start + rep * nnodes + offset;
                let slot = counts.get_mut(node).ok_or_else(|| WlmError::Parse {
                    tool: "flux",
                    detail: format!("taskmap references node {node} outside the nodelist"),
                })?;
                *slot += ppn;
            }
        }
    }

    Ok(nodelist.iter().cloned().zip(counts).collect())
}

/// Expand the `nodelist` entries of an R object.
pub fn nodelist_from_r(r_json: &str) -> Result<Vec<String>, WlmError> {
    let value: Value = serde_json::from_str(r_json).map_err(|err| WlmError::Parse {
        tool: "flux",
        detail: format!("bad R object: {err}"),
    })?;
    let lists = value
        .pointer("/execution/nodelist")
        .and_then(Value::as_array)
        .ok_or_else(|| WlmError::Parse {
            tool: "flux",
            detail: "R object has no execution.nodelist".to_string(),
        })?;

    let mut hosts = Vec::new();
    for list in lists {
        let list = list.as_str().ok_or_else(|| WlmError::Parse {
            tool: "flux",
            detail: "nodelist entry is not a string".to_string(),
        })?;
        hosts.extend(expand_hostlist(list)?);
    }
    Ok(hosts)
}

/// Pull the `libflux-core` version out of `flux --version` output.
pub fn parse_libflux_version(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim() == "libflux-core" {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "eventlog_tests.rs"]
mod tests;
