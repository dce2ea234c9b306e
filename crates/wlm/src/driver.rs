// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The capability set every WLM driver implements.

use std::collections::BTreeSet;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use cti_core::{DaemonId, HostPlacement, Proctable, WlmType};
use indexmap::IndexMap;

use crate::error::WlmError;

/// Whether a launch stops at the MPIR startup barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierMode {
    /// Return with the job held pre-`main`.
    Hold,
    /// Release immediately after extraction.
    Run,
}

/// Whether a remote command must finish everywhere before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchrony {
    Sync,
    Async,
}

/// Stdio routing for the launcher. `None` fds go to `/dev/null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioFds {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
}

/// A job launch request as the frontend hands it down: the arguments that
/// follow the launcher binary, environment for the job, stdio routing.
#[derive(Debug, Clone, Default)]
pub struct JobLaunchSpec {
    pub launcher_args: Vec<String>,
    pub env: Vec<String>,
    pub stdio: StdioFds,
}

/// WLM-specific identity of an already-running job, for attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRef {
    /// Slurm `jobid.stepid`.
    SlurmStep { job_id: u32, step_id: u32 },
    /// PALS application UUID.
    PalsApid(String),
    /// Flux f58 or hex job id string.
    FluxJob(String),
    /// Launcher pid on this host (generic/SSH).
    LauncherPid(i32),
}

impl JobRef {
    /// Parse from the canonical string form used on tool command lines.
    pub fn parse(wlm: WlmType, value: &str) -> Result<Self, WlmError> {
        match wlm {
            WlmType::Slurm => {
                let (job, step) = value.split_once('.').unwrap_or((value, "0"));
                let job_id = job
                    .parse()
                    .map_err(|_| WlmError::BadJobRef(value.to_string()))?;
                let step_id = step
                    .parse()
                    .map_err(|_| WlmError::BadJobRef(value.to_string()))?;
                Ok(JobRef::SlurmStep { job_id, step_id })
            }
            WlmType::Pals => Ok(JobRef::PalsApid(value.to_string())),
            WlmType::Flux => Ok(JobRef::FluxJob(value.to_string())),
            WlmType::Ssh | WlmType::Localhost | WlmType::Alps => value
                .parse()
                .map(JobRef::LauncherPid)
                .map_err(|_| WlmError::BadJobRef(value.to_string())),
        }
    }
}

/// Driver factory surface: one instance per frontend.
pub trait WlmDriver: Send + Sync {
    fn wlm_type(&self) -> WlmType;

    /// The launcher binary name, after `CTI_LAUNCHER_NAME` overrides.
    fn launcher_name(&self) -> String;

    /// Start a job. With [`BarrierMode::Hold`] the job is stopped at the
    /// startup barrier when this returns.
    fn launch(
        &self,
        spec: &JobLaunchSpec,
        barrier: BarrierMode,
    ) -> Result<Box<dyn WlmJob>, WlmError>;

    /// Bind to a running job.
    fn attach(&self, job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError>;
}

/// One launched or attached job.
pub trait WlmJob: Send + Sync {
    fn wlm_type(&self) -> WlmType;

    /// WLM-specific id string (`jobid.stepid`, apid, f58, …).
    fn job_id(&self) -> String;

    /// Helper-side registration carrying this job's utilities.
    fn daemon_app_id(&self) -> DaemonId;

    fn proctable(&self) -> &Proctable;

    /// Staging root on the compute nodes (parent of session sandboxes).
    fn toolpath(&self) -> PathBuf;

    /// Where backend daemons find the WLM's PMI attributes file, if the
    /// WLM provides one.
    fn attribs_path(&self) -> Option<PathBuf> {
        None
    }

    fn placement(&self) -> Vec<HostPlacement> {
        self.proctable().placements()
    }

    fn hostnames(&self) -> Vec<String> {
        self.proctable().hostnames()
    }

    fn num_pes(&self) -> usize {
        self.proctable().num_pes()
    }

    fn num_nodes(&self) -> usize {
        self.proctable().num_hosts()
    }

    fn binary_rank_map(&self) -> IndexMap<String, Vec<usize>> {
        self.proctable().binary_rank_map()
    }

    /// Hostname of the node the launcher runs on.
    fn launcher_hostname(&self) -> Result<String, WlmError>;

    /// Let a barrier-held job proceed into `main`. Exactly once.
    fn release_barrier(&self) -> Result<(), WlmError>;

    /// Deliver `signo` to every rank.
    fn kill(&self, signo: i32) -> Result<(), WlmError>;

    /// Make `package` appear as `<toolpath>/<dest_name>` on every node.
    /// Idempotent; re-ships overwrite.
    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError>;

    /// Run `args` (an argv whose first element is the remote binary) on
    /// every node of the job.
    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        synchrony: Synchrony,
    ) -> Result<(), WlmError>;

    /// Subset of `paths` present on every node. Drivers without a cheap
    /// probe return the empty set, which just means "ship everything".
    fn check_files(&self, paths: &BTreeSet<PathBuf>) -> Result<BTreeSet<PathBuf>, WlmError> {
        let _ = paths;
        Ok(BTreeSet::new())
    }

    /// True iff the WLM still reports at least one live rank.
    fn is_running(&self) -> Result<bool, WlmError>;

    /// Forget the job on the helper side. Called exactly once when the
    /// owning App is deregistered.
    fn deregister(&self) -> Result<(), WlmError>;
}

/// Turn the optional stdio triple into three live fds, `/dev/null` where
/// unspecified. The owners must stay alive for the duration of the
/// request.
pub(crate) fn resolve_stdio(
    stdio: &StdioFds,
) -> Result<(Vec<std::os::fd::OwnedFd>, [RawFd; 3]), WlmError> {
    let mut owners = Vec::new();
    let mut resolve = |explicit: Option<RawFd>, read: bool| -> Result<RawFd, WlmError> {
        if let Some(fd) = explicit {
            return Ok(fd);
        }
        let file = if read {
            std::fs::File::open("/dev/null")?
        } else {
            std::fs::OpenOptions::new().write(true).open("/dev/null")?
        };
        let owned: std::os::fd::OwnedFd = file.into();
        let raw = {
            use std::os::fd::AsRawFd;
            owned.as_raw_fd()
        };
        owners.push(owned);
        Ok(raw)
    };

    let stdin = resolve(stdio.stdin, true)?;
    let stdout = resolve(stdio.stdout, false)?;
    let stderr = resolve(stdio.stderr, false)?;
    Ok((owners, [stdin, stdout, stderr]))
}

/// Wire proctable entries are rank-ordered; ranks are their positions.
pub(crate) fn proctable_from_wire(
    entries: &[cti_wire::ProcEntry],
) -> Result<Proctable, WlmError> {
    let entries = entries
        .iter()
        .enumerate()
        .map(|(rank, entry)| cti_core::ProctableEntry {
            rank,
            hostname: entry.hostname.clone(),
            pid: entry.pid,
            executable: entry.executable.clone(),
        })
        .collect();
    Ok(Proctable::new(entries)?)
}

/// Fold per-node `--check-file` output into the set present on every node:
/// a path counts only if all `num_nodes` nodes reported it.
pub(crate) fn intersect_check_output(output: &str, num_nodes: usize) -> BTreeSet<PathBuf> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        *counts.entry(line).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= num_nodes.max(1))
        .map(|(path, _)| PathBuf::from(path))
        .collect()
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
