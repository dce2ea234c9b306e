// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic driver: an MPIR-capable `mpiexec` plus passwordless SSH for
//! every per-node operation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cti_core::env as cti_env;
use cti_core::{Config, DaemonId, Proctable, WlmType};
use cti_helper::HelperClient;
use cti_wire::{LaunchData, RunMode};
use parking_lot::Mutex;
use tracing::warn;

use crate::driver::{
    proctable_from_wire, resolve_stdio, BarrierMode, JobLaunchSpec, JobRef, StdioFds, Synchrony,
    WlmDriver, WlmJob,
};
use crate::error::WlmError;
use crate::subprocess::{self, ExecOutput};

pub struct SshDriver {
    helper: Arc<HelperClient>,
    config: Config,
    launcher: String,
}

impl SshDriver {
    pub fn new(helper: Arc<HelperClient>, config: Config) -> Self {
        let launcher = config.launcher_name.clone().unwrap_or_else(|| "mpiexec".to_string());
        Self { helper, config, launcher }
    }

    fn build_job(
        &self,
        launcher_pid: i32,
        daemon_app_id: DaemonId,
        mpir_id: Option<DaemonId>,
        proctable: Proctable,
    ) -> SshJob {
        SshJob {
            helper: Arc::clone(&self.helper),
            daemon_app_id,
            mpir_id: Mutex::new(mpir_id),
            launcher_pid,
            toolpath: self
                .config
                .backend_tmpdir
                .clone()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(format!("cti-{launcher_pid}")),
            ssh_opts: ssh_options(),
            proctable,
        }
    }
}

impl WlmDriver for SshDriver {
    fn wlm_type(&self) -> WlmType {
        WlmType::Ssh
    }

    fn launcher_name(&self) -> String {
        self.launcher.clone()
    }

    fn launch(
        &self,
        spec: &JobLaunchSpec,
        barrier: BarrierMode,
    ) -> Result<Box<dyn WlmJob>, WlmError> {
        let mut argv = vec![self.launcher.clone()];
        argv.extend(spec.launcher_args.iter().cloned());
        let launch = LaunchData {
            file: self.launcher.clone(),
            argv,
            env: spec.env.clone(),
            env_blacklist: vec![],
        };
        let (_owners, raw) = resolve_stdio(&spec.stdio)?;
        let mpir = self.helper.launch_mpir(&launch, raw)?;
        let proctable = proctable_from_wire(&mpir.proctable)?;

        let mpir_id = DaemonId::new(mpir.id);
        let job = self.build_job(mpir.launcher_pid, mpir_id, Some(mpir_id), proctable);
        job.prepare_toolpath()?;

        if barrier == BarrierMode::Run {
            job.release_barrier()?;
        }
        Ok(Box::new(job))
    }

    fn attach(&self, job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError> {
        let JobRef::LauncherPid(pid) = job else {
            return Err(WlmError::BadJobRef(format!("{job:?}")));
        };
        let mpir = self
            .helper
            .attach_mpir(&self.launcher, *pid)
            .map_err(|err| WlmError::NotRunning(format!("launcher pid {pid}: {err}")))?;
        let proctable = proctable_from_wire(&mpir.proctable)?;
        let mpir_id = DaemonId::new(mpir.id);

        // The job was already past its barrier; let the launcher continue
        // immediately and keep the id for utility ownership.
        self.helper.release_mpir(mpir_id)?;
        let job = self.build_job(*pid, mpir_id, None, proctable);
        job.prepare_toolpath()?;
        Ok(Box::new(job))
    }
}

pub struct SshJob {
    helper: Arc<HelperClient>,
    daemon_app_id: DaemonId,
    mpir_id: Mutex<Option<DaemonId>>,
    launcher_pid: i32,
    proctable: Proctable,
    toolpath: PathBuf,
    ssh_opts: Vec<String>,
}

impl SshJob {
    fn prepare_toolpath(&self) -> Result<(), WlmError> {
        for host in self.hostnames() {
            ssh_exec(
                &self.ssh_opts,
                &host,
                &["mkdir".to_string(), "-p".to_string(),
                    self.toolpath.to_string_lossy().into_owned()],
            )?;
        }
        Ok(())
    }

    /// Rank pids grouped per host, for remote kill.
    fn pids_by_host(&self) -> Vec<(String, Vec<i32>)> {
        self.proctable
            .placements()
            .into_iter()
            .map(|p| (p.hostname, p.pids.into_iter().map(|(_, pid)| pid).collect()))
            .collect()
    }
}

impl WlmJob for SshJob {
    fn wlm_type(&self) -> WlmType {
        WlmType::Ssh
    }

    fn job_id(&self) -> String {
        self.launcher_pid.to_string()
    }

    fn daemon_app_id(&self) -> DaemonId {
        self.daemon_app_id
    }

    fn proctable(&self) -> &Proctable {
        &self.proctable
    }

    fn toolpath(&self) -> PathBuf {
        self.toolpath.clone()
    }

    fn launcher_hostname(&self) -> Result<String, WlmError> {
        crate::slurm::local_hostname()
    }

    fn release_barrier(&self) -> Result<(), WlmError> {
        let id = self.mpir_id.lock().take().ok_or(WlmError::BarrierReleased)?;
        self.helper.release_mpir(id)?;
        Ok(())
    }

    fn kill(&self, signo: i32) -> Result<(), WlmError> {
        for (host, pids) in self.pids_by_host() {
            let mut command = vec!["kill".to_string(), format!("-{signo}")];
            command.extend(pids.iter().map(|pid| pid.to_string()));
            ssh_exec(&self.ssh_opts, &host, &command)?;
        }
        Ok(())
    }

    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError> {
        let dest = self.toolpath.join(dest_name);
        for host in self.hostnames() {
            scp_send(&self.ssh_opts, &host, package, &dest)?;
        }
        Ok(())
    }

    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        synchrony: Synchrony,
    ) -> Result<(), WlmError> {
        for host in self.hostnames() {
            let mut command = Vec::new();
            if !env.is_empty() {
                command.push("env".to_string());
                command.extend(env.iter().cloned());
            }
            command.extend(args.iter().cloned());

            match synchrony {
                Synchrony::Sync => {
                    ssh_exec(&self.ssh_opts, &host, &command)?;
                }
                Synchrony::Async => {
                    // Asynchronous daemons stay under helper ownership.
                    let mut argv = vec!["ssh".to_string()];
                    argv.extend(self.ssh_opts.iter().cloned());
                    argv.push(host.clone());
                    argv.extend(command);
                    let launch = LaunchData {
                        file: "ssh".to_string(),
                        argv,
                        env: vec![],
                        env_blacklist: vec![],
                    };
                    let (_owners, raw) = resolve_stdio(&StdioFds::default())?;
                    self.helper.fork_execvp_util(
                        self.daemon_app_id,
                        RunMode::Asynchronous,
                        &launch,
                        raw,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn check_files(&self, paths: &BTreeSet<PathBuf>) -> Result<BTreeSet<PathBuf>, WlmError> {
        if paths.is_empty() {
            return Ok(BTreeSet::new());
        }
        let script = paths
            .iter()
            .map(|p| format!("[ -e '{}' ] && echo '{}'", p.display(), p.display()))
            .collect::<Vec<_>>()
            .join("; ");

        let mut present: Option<BTreeSet<PathBuf>> = None;
        for host in self.hostnames() {
            let out = ssh_exec_allow_failure(
                &self.ssh_opts,
                &host,
                &["sh".to_string(), "-c".to_string(), script.clone()],
            )?;
            let here: BTreeSet<PathBuf> =
                out.stdout.lines().map(|line| PathBuf::from(line.trim())).collect();
            present = Some(match present {
                None => here,
                Some(acc) => acc.intersection(&here).cloned().collect(),
            });
        }
        Ok(present.unwrap_or_default())
    }

    fn is_running(&self) -> Result<bool, WlmError> {
        for (host, pids) in self.pids_by_host() {
            let mut command = vec!["kill".to_string(), "-0".to_string()];
            command.extend(pids.iter().map(|pid| pid.to_string()));
            if let Ok(out) = ssh_exec_allow_failure(&self.ssh_opts, &host, &command) {
                if out.success() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn deregister(&self) -> Result<(), WlmError> {
        for host in self.hostnames() {
            if let Err(err) = ssh_exec_allow_failure(
                &self.ssh_opts,
                &host,
                &["rm".to_string(), "-rf".to_string(),
                    self.toolpath.to_string_lossy().into_owned()],
            ) {
                warn!(host = %host, error = %err, "failed to remove remote sandbox");
            }
        }
        self.helper.deregister_app(self.daemon_app_id)?;
        Ok(())
    }
}

/// Extra `ssh`/`scp` options from `CTI_SSH_OPTS`.
pub(crate) fn ssh_options() -> Vec<String> {
    std::env::var(cti_env::SSH_OPTS_ENV)
        .map(|opts| opts.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

pub(crate) fn ssh_exec(
    opts: &[String],
    host: &str,
    command: &[String],
) -> Result<ExecOutput, WlmError> {
    let mut args = opts.to_vec();
    args.push(host.to_string());
    args.extend(command.iter().cloned());
    subprocess::run_success("ssh", &args)
}

pub(crate) fn ssh_exec_allow_failure(
    opts: &[String],
    host: &str,
    command: &[String],
) -> Result<ExecOutput, WlmError> {
    let mut args = opts.to_vec();
    args.push(host.to_string());
    args.extend(command.iter().cloned());
    subprocess::run_capture("ssh", &args)
}

pub(crate) fn scp_send(
    opts: &[String],
    host: &str,
    local: &Path,
    remote: &Path,
) -> Result<(), WlmError> {
    let mut args = opts.to_vec();
    args.push("-q".to_string());
    args.push(local.to_string_lossy().into_owned());
    args.push(format!("{host}:{}", remote.display()));
    subprocess::run_success("scp", &args).map(|_| ())
}
