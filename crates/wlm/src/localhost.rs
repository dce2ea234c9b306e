// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Localhost driver: this machine is the one-node "cluster". Used for
//! tool development and the test suite.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cti_core::{Config, DaemonId, Proctable, ProctableEntry, WlmType};
use cti_helper::HelperClient;
use cti_wire::{LaunchData, RunMode};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::driver::{
    resolve_stdio, BarrierMode, JobLaunchSpec, JobRef, Synchrony, WlmDriver, WlmJob,
};
use crate::error::WlmError;

pub struct LocalhostDriver {
    helper: Arc<HelperClient>,
    config: Config,
}

impl LocalhostDriver {
    pub fn new(helper: Arc<HelperClient>, config: Config) -> Self {
        Self { helper, config }
    }

    fn build_job(&self, daemon_app_id: DaemonId, pid: i32, executable: String) -> Result<LocalhostJob, WlmError> {
        let hostname = crate::slurm::local_hostname()?;
        let proctable = Proctable::new(vec![ProctableEntry {
            rank: 0,
            hostname,
            pid,
            executable,
        }])?;
        let toolpath = self
            .config
            .backend_tmpdir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("cti-local-{pid}"));
        std::fs::create_dir_all(&toolpath)?;
        Ok(LocalhostJob {
            helper: Arc::clone(&self.helper),
            daemon_app_id,
            pid,
            proctable,
            toolpath,
        })
    }
}

impl WlmDriver for LocalhostDriver {
    fn wlm_type(&self) -> WlmType {
        WlmType::Localhost
    }

    fn launcher_name(&self) -> String {
        self.config.launcher_name.clone().unwrap_or_else(|| "localhost".to_string())
    }

    fn launch(
        &self,
        spec: &JobLaunchSpec,
        barrier: BarrierMode,
    ) -> Result<Box<dyn WlmJob>, WlmError> {
        if barrier == BarrierMode::Hold {
            return Err(WlmError::Unsupported(
                "the localhost launcher has no startup barrier".to_string(),
            ));
        }
        let file = spec
            .launcher_args
            .first()
            .cloned()
            .ok_or_else(|| WlmError::Unsupported("empty launch argv".to_string()))?;
        let launch = LaunchData {
            file: file.clone(),
            argv: spec.launcher_args.clone(),
            env: spec.env.clone(),
            env_blacklist: vec![],
        };
        let (_owners, raw) = resolve_stdio(&spec.stdio)?;
        let (daemon_app_id, pid) = self.helper.fork_execvp_app(&launch, raw)?;
        Ok(Box::new(self.build_job(daemon_app_id, pid, file)?))
    }

    fn attach(&self, job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError> {
        let JobRef::LauncherPid(pid) = job else {
            return Err(WlmError::BadJobRef(format!("{job:?}")));
        };
        if kill(Pid::from_raw(*pid), None).is_err() {
            return Err(WlmError::NotRunning(pid.to_string()));
        }
        let daemon_app_id = self.helper.register_app(*pid)?;
        let executable = std::fs::read_link(format!("/proc/{pid}/exe"))
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Box::new(self.build_job(daemon_app_id, *pid, executable)?))
    }
}

pub struct LocalhostJob {
    helper: Arc<HelperClient>,
    daemon_app_id: DaemonId,
    pid: i32,
    proctable: Proctable,
    toolpath: PathBuf,
}

impl WlmJob for LocalhostJob {
    fn wlm_type(&self) -> WlmType {
        WlmType::Localhost
    }

    fn job_id(&self) -> String {
        self.pid.to_string()
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
        Err(WlmError::BarrierReleased)
    }

    fn kill(&self, signo: i32) -> Result<(), WlmError> {
        let signal = Signal::try_from(signo)
            .map_err(|_| WlmError::Unsupported(format!("signal {signo}")))?;
        kill(Pid::from_raw(self.pid), signal)
            .map_err(|err| WlmError::NotRunning(format!("pid {}: {err}", self.pid)))
    }

    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError> {
        std::fs::create_dir_all(&self.toolpath)?;
        std::fs::copy(package, self.toolpath.join(dest_name))?;
        Ok(())
    }

    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        synchrony: Synchrony,
    ) -> Result<(), WlmError> {
        let file = args
            .first()
            .cloned()
            .ok_or_else(|| WlmError::Unsupported("empty daemon argv".to_string()))?;
        let launch = LaunchData {
            file,
            argv: args.to_vec(),
            env: env.to_vec(),
            env_blacklist: vec![],
        };
        let (_owners, raw) = resolve_stdio(&crate::driver::StdioFds::default())?;
        let mode = match synchrony {
            Synchrony::Sync => RunMode::Synchronous,
            Synchrony::Async => RunMode::Asynchronous,
        };
        let ok = self.helper.fork_execvp_util(self.daemon_app_id, mode, &launch, raw)?;
        if ok {
            Ok(())
        } else {
            Err(WlmError::CommandFailed {
                command: "tool daemon".to_string(),
                status: 1,
                stderr: "local tool daemon failed".to_string(),
            })
        }
    }

    fn check_files(&self, paths: &BTreeSet<PathBuf>) -> Result<BTreeSet<PathBuf>, WlmError> {
        Ok(paths.iter().filter(|path| path.exists()).cloned().collect())
    }

    fn is_running(&self) -> Result<bool, WlmError> {
        Ok(self.helper.check_app(self.daemon_app_id)?)
    }

    fn deregister(&self) -> Result<(), WlmError> {
        let _ = std::fs::remove_dir_all(&self.toolpath);
        self.helper.deregister_app(self.daemon_app_id)?;
        Ok(())
    }
}
