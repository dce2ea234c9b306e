// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rank placement: the MPIR process table and its per-host grouping.

use indexmap::IndexMap;
use thiserror::Error;

/// One rank as reported at the MPIR startup barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProctableEntry {
    pub rank: usize,
    pub hostname: String,
    pub pid: i32,
    pub executable: String,
}

/// Per-host placement: ordered `(rank, pid)` pairs for one compute node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlacement {
    pub hostname: String,
    pub num_pes: usize,
    pub pids: Vec<(usize, i32)>,
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("proctable is empty")]
    Empty,
    #[error("rank {0} appears more than once in proctable")]
    DuplicateRank(usize),
    #[error("proctable ranks are not contiguous: missing rank {0}")]
    MissingRank(usize),
}

/// Rank-ordered process table of a job stopped at (or released from) the
/// startup barrier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proctable {
    entries: Vec<ProctableEntry>,
}

impl Proctable {
    /// Build from entries in any order. Ranks must be unique and form
    /// `0..len`; every rank belongs to exactly one host by construction.
    pub fn new(mut entries: Vec<ProctableEntry>) -> Result<Self, PlacementError> {
        if entries.is_empty() {
            return Err(PlacementError::Empty);
        }
        entries.sort_by_key(|e| e.rank);
        for (expected, entry) in entries.iter().enumerate() {
            if entry.rank < expected {
                return Err(PlacementError::DuplicateRank(entry.rank));
            }
            if entry.rank > expected {
                return Err(PlacementError::MissingRank(expected));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ProctableEntry] {
        &self.entries
    }

    pub fn num_pes(&self) -> usize {
        self.entries.len()
    }

    /// Hostnames in first-rank order, deduplicated.
    pub fn hostnames(&self) -> Vec<String> {
        let mut seen = IndexMap::new();
        for entry in &self.entries {
            seen.entry(entry.hostname.clone()).or_insert(());
        }
        seen.into_keys().collect()
    }

    pub fn num_hosts(&self) -> usize {
        self.hostnames().len()
    }

    /// Group into per-host placements, hosts in first-rank order.
    pub fn placements(&self) -> Vec<HostPlacement> {
        let mut hosts: IndexMap<&str, Vec<(usize, i32)>> = IndexMap::new();
        for entry in &self.entries {
            hosts.entry(entry.hostname.as_str()).or_default().push((entry.rank, entry.pid));
        }
        hosts
            .into_iter()
            .map(|(hostname, pids)| HostPlacement {
                hostname: hostname.to_string(),
                num_pes: pids.len(),
                pids,
            })
            .collect()
    }

    /// Executable path → ranks running it, for MPMD jobs.
    pub fn binary_rank_map(&self) -> IndexMap<String, Vec<usize>> {
        let mut map: IndexMap<String, Vec<usize>> = IndexMap::new();
        for entry in &self.entries {
            map.entry(entry.executable.clone()).or_default().push(entry.rank);
        }
        map
    }

    /// First PE resident on `hostname`, if any rank is placed there.
    pub fn first_pe_on(&self, hostname: &str) -> Option<usize> {
        self.entries.iter().find(|e| e.hostname == hostname).map(|e| e.rank)
    }
}

#[cfg(test)]
#[path = "placement_tests.rs"]
mod tests;
