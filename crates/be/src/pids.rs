// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local rank discovery: PMI attributes first, the shipped layout blobs
//! when the WLM's own PMI file is absent.

use std::path::Path;

use cti_core::layout;
use tracing::debug;

use crate::env::BackendEnv;
use crate::error::BeError;
use crate::pmi_attribs;

/// This node's slice of the job and its position in the global PE space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSlice {
    pub first_pe: usize,
    /// `(rank, pid)` pairs local to this node, rank-ordered.
    pub rank_pids: Vec<(usize, i32)>,
}

impl NodeSlice {
    pub fn num_pes(&self) -> usize {
        self.rank_pids.len()
    }
}

/// `(rank, pid)` pairs for every PE on this compute node.
pub fn find_app_pids(be: &BackendEnv) -> Result<NodeSlice, BeError> {
    if let Some(attribs_dir) = &be.attribs_dir {
        match pmi_attribs::read_with_timeout(
            attribs_dir,
            be.pmi_fopen_timeout(),
            be.pmi_extra_sleep(),
        ) {
            Ok(attribs) => {
                let first_pe = attribs.rank_pids.first().map(|(rank, _)| *rank).unwrap_or(0);
                return Ok(NodeSlice { first_pe, rank_pids: attribs.rank_pids });
            }
            Err(err) => {
                debug!(error = %err, "pmi_attribs unavailable, falling back to layout blobs");
            }
        }
    }
    node_slice_from_layout(&be.file_dir(), &be.node_hostname()?)
}

/// Join the shipped layout and pid blobs on this node's hostname.
pub fn node_slice_from_layout(file_dir: &Path, hostname: &str) -> Result<NodeSlice, BeError> {
    let mut layout_file = std::fs::File::open(file_dir.join(layout::LAYOUT_FILE_NAME))?;
    let nodes = layout::read_layout(&mut layout_file)?;
    let node = nodes
        .iter()
        .find(|node| node.hostname == hostname)
        .ok_or_else(|| BeError::NodeNotInJob { hostname: hostname.to_string() })?;

    let mut pid_file = std::fs::File::open(file_dir.join(layout::PID_FILE_NAME))?;
    let pids = layout::read_pids(&mut pid_file)?;

    let first_pe = node.first_pe as usize;
    let rank_pids = (0..node.pes_here as usize)
        .map(|offset| {
            let rank = first_pe + offset;
            (rank, pids.get(rank).copied().unwrap_or(0))
        })
        .collect();
    Ok(NodeSlice { first_pe, rank_pids })
}

#[cfg(test)]
#[path = "pids_tests.rs"]
mod tests;
