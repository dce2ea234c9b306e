// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The WLM-written PMI attributes file: this node's rank/pid pairs.
//!
//! Line-oriented: a format version, the application id, the local rank
//! count, then one `<rank> <pid>` line per local PE. The file appears some
//! time after the ranks start, so opening it races application startup;
//! the read loop is bounded by `CTI_PMI_FOPEN_TIMEOUT`.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::BeError;

pub const PMI_ATTRIBS_FILE_NAME: &str = "pmi_attribs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmiAttribs {
    pub version: u32,
    pub apid: String,
    /// `(rank, pid)` for every PE on this node, rank-ordered.
    pub rank_pids: Vec<(usize, i32)>,
}

pub fn parse(contents: &str) -> Result<PmiAttribs, BeError> {
    let mut lines = contents.lines();

    let version = lines
        .next()
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| BeError::BadAttribs("missing version line".to_string()))?;
    let apid = lines
        .next()
        .map(|line| line.trim().to_string())
        .filter(|apid| !apid.is_empty())
        .ok_or_else(|| BeError::BadAttribs("missing apid line".to_string()))?;
    let count: usize = lines
        .next()
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| BeError::BadAttribs("missing rank count line".to_string()))?;

    let mut rank_pids = Vec::with_capacity(count);
    for line in lines.take(count) {
        let (rank, pid) = line
            .trim()
            .split_once(' ')
            .ok_or_else(|| BeError::BadAttribs(format!("malformed rank line {line:?}")))?;
        let rank = rank
            .parse()
            .map_err(|_| BeError::BadAttribs(format!("bad rank in {line:?}")))?;
        let pid = pid
            .parse()
            .map_err(|_| BeError::BadAttribs(format!("bad pid in {line:?}")))?;
        rank_pids.push((rank, pid));
    }
    if rank_pids.len() != count {
        return Err(BeError::BadAttribs(format!(
            "expected {count} rank lines, found {}",
            rank_pids.len()
        )));
    }
    rank_pids.sort_unstable();

    Ok(PmiAttribs { version, apid, rank_pids })
}

/// Wait for the attributes file to show up and parse it.
pub fn read_with_timeout(
    dir: &Path,
    timeout: Duration,
    extra_sleep: Duration,
) -> Result<PmiAttribs, BeError> {
    let path = dir.join(PMI_ATTRIBS_FILE_NAME);
    let deadline = Instant::now() + timeout;

    let contents = loop {
        match std::fs::read_to_string(&path) {
            Ok(contents) if !contents.is_empty() => break contents,
            _ if Instant::now() >= deadline => {
                return Err(BeError::AttribsTimeout {
                    path,
                    timeout_s: timeout.as_secs(),
                })
            }
            _ => std::thread::sleep(Duration::from_millis(250)),
        }
    };

    // Settle time for WLMs that fill the file in two writes.
    if !extra_sleep.is_zero() {
        debug!(sleep_s = extra_sleep.as_secs(), "pmi_attribs extra sleep");
        std::thread::sleep(extra_sleep);
    }

    parse(&contents)
}

#[cfg(test)]
#[path = "pmi_attribs_tests.rs"]
mod tests;
