// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `palstat` output parsing: key/value job listings and the MPIR-style
//! proctable listing.

use cti_core::{Proctable, ProctableEntry};

use crate::error::WlmError;

/// One job block from `palstat --node <host>`: indented `Key: Value`
/// pairs, one block per application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PalstatJob {
    pub apid: String,
    pub state: String,
    pub pbs_job_id: Option<String>,
}

/// Parse every job block in a `palstat` listing.
pub fn parse_jobs(output: &str) -> Vec<PalstatJob> {
    let mut jobs: Vec<PalstatJob> = Vec::new();
    let mut current = PalstatJob::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "Apid" => {
                if !current.apid.is_empty() {
                    jobs.push(std::mem::take(&mut current));
                }
                current.apid = value.to_string();
            }
            "State" => current.state = value.to_string(),
            "PBS Job Id" | "Jobid" => current.pbs_job_id = Some(value.to_string()),
            _ => {}
        }
    }
    if !current.apid.is_empty() {
        jobs.push(current);
    }
    jobs
}

/// Find the apid belonging to a PBS job id in a `palstat` listing.
pub fn find_apid_for_pbs_job(output: &str, pbs_job_id: &str) -> Option<String> {
    parse_jobs(output)
        .into_iter()
        .find(|job| job.pbs_job_id.as_deref() == Some(pbs_job_id))
        .map(|job| job.apid)
}

/// Parse `palstat -n <host> -p <apid>`: a header line followed by
/// `<HOST> <EXECUTABLE> <PID>` rows, rank-ordered.
pub fn parse_proctable(output: &str) -> Result<Proctable, WlmError> {
    let mut entries = Vec::new();
    for (rank, line) in output.lines().skip(1).enumerate() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let mut fields = line.split_whitespace();
        let (Some(hostname), Some(executable), Some(pid)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(WlmError::Parse {
                tool: "palstat",
                detail: format!("malformed proctable row {line:?}"),
            });
        };
        let pid: i32 = pid.parse().map_err(|_| WlmError::Parse {
            tool: "palstat",
            detail: format!("bad pid in proctable row {line:?}"),
        })?;
        entries.push(ProctableEntry {
            rank,
            hostname: hostname.to_string(),
            pid,
            executable: executable.to_string(),
        });
    }

    if entries.is_empty() {
        return Err(WlmError::Parse {
            tool: "palstat",
            detail: "proctable listing is empty".to_string(),
        });
    }
    Ok(Proctable::new(entries)?)
}

#[cfg(test)]
#[path = "palstat_tests.rs"]
mod tests;
