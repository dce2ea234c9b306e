// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ALPS driver: `aprun` under MPIR, `apkill` signalling, per-node SSH for
//! file movement (the libalps toolhelper transfer has no CLI equivalent).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cti_core::{Config, DaemonId, Proctable, WlmType};
use cti_helper::HelperClient;
use cti_wire::LaunchData;
use parking_lot::Mutex;
use tracing::warn;

use crate::driver::{
    proctable_from_wire, resolve_stdio, BarrierMode, JobLaunchSpec, JobRef, Synchrony, WlmDriver,
    WlmJob,
};
use crate::error::WlmError;
use crate::ssh::{scp_send, ssh_exec, ssh_exec_allow_failure, ssh_options};
use crate::subprocess;

/// The two historic toolhelper path conventions; both still occur in the
/// field and the backend probes them in this order.
pub fn toolhelper_candidates(apid: &str) -> [PathBuf; 2] {
    [
        PathBuf::from(format!("/var/spool/alps/{apid}/toolhelper{apid}")),
        PathBuf::from(format!("/var/opt/cray/alps/spool/{apid}/toolhelper{apid}")),
    ]
}

/// pmi_attribs directories matching the same conventions.
pub fn attribs_candidates(apid: &str) -> [PathBuf; 2] {
    [
        PathBuf::from(format!("/var/spool/alps/{apid}")),
        PathBuf::from(format!("/var/opt/cray/alps/spool/{apid}")),
    ]
}

pub struct AlpsDriver {
    helper: Arc<HelperClient>,
    config: Config,
    launcher: String,
}

impl AlpsDriver {
    pub fn new(helper: Arc<HelperClient>, config: Config) -> Self {
        let launcher = config.launcher_name.clone().unwrap_or_else(|| "aprun".to_string());
        Self { helper, config, launcher }
    }
}

impl WlmDriver for AlpsDriver {
    fn wlm_type(&self) -> WlmType {
        WlmType::Alps
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

        let mpir_id = DaemonId::new(mpir.id);
        // aprun exposes the apid through the totalview job id variable.
        let apid = self
            .helper
            .read_string_mpir(mpir_id, "totalview_jobid")
            .unwrap_or_else(|_| mpir.launcher_pid.to_string());
        let proctable = proctable_from_wire(&mpir.proctable)?;

        let job = AlpsJob {
            helper: Arc::clone(&self.helper),
            daemon_app_id: mpir_id,
            mpir_id: Mutex::new(Some(mpir_id)),
            toolpath: self
                .config
                .backend_tmpdir
                .clone()
                .unwrap_or_else(|| toolhelper_candidates(&apid)[0].clone()),
            apid,
            proctable,
            ssh_opts: ssh_options(),
        };
        if barrier == BarrierMode::Run {
            job.release_barrier()?;
        }
        Ok(Box::new(job))
    }

    fn attach(&self, job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError> {
        // ALPS attach would need libalps apid lookup; only pid-based
        // attach of a local aprun is supported.
        let JobRef::LauncherPid(pid) = job else {
            return Err(WlmError::BadJobRef(format!("{job:?}")));
        };
        let mpir = self
            .helper
            .attach_mpir(&self.launcher, *pid)
            .map_err(|err| WlmError::NotRunning(format!("aprun pid {pid}: {err}")))?;
        let mpir_id = DaemonId::new(mpir.id);
        let apid = self
            .helper
            .read_string_mpir(mpir_id, "totalview_jobid")
            .unwrap_or_else(|_| pid.to_string());
        let proctable = proctable_from_wire(&mpir.proctable)?;
        self.helper.release_mpir(mpir_id)?;

        Ok(Box::new(AlpsJob {
            helper: Arc::clone(&self.helper),
            daemon_app_id: mpir_id,
            mpir_id: Mutex::new(None),
            toolpath: self
                .config
                .backend_tmpdir
                .clone()
                .unwrap_or_else(|| toolhelper_candidates(&apid)[0].clone()),
            apid,
            proctable,
            ssh_opts: ssh_options(),
        }))
    }
}

pub struct AlpsJob {
    helper: Arc<HelperClient>,
    daemon_app_id: DaemonId,
    mpir_id: Mutex<Option<DaemonId>>,
    apid: String,
    proctable: Proctable,
    toolpath: PathBuf,
    ssh_opts: Vec<String>,
}

impl WlmJob for AlpsJob {
    fn wlm_type(&self) -> WlmType {
        WlmType::Alps
    }

    fn job_id(&self) -> String {
        self.apid.clone()
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

    fn attribs_path(&self) -> Option<PathBuf> {
        Some(attribs_candidates(&self.apid)[0].clone())
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
        subprocess::run_success(
            "apkill",
            &[format!("-{signo}"), self.apid.clone()],
        )
        .map(|_| ())
    }

    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError> {
        let dest = self.toolpath.join(dest_name);
        for host in self.hostnames() {
            ssh_exec(
                &self.ssh_opts,
                &host,
                &["mkdir".to_string(), "-p".to_string(),
                    self.toolpath.to_string_lossy().into_owned()],
            )?;
            scp_send(&self.ssh_opts, &host, package, &dest)?;
        }
        Ok(())
    }

    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        _synchrony: Synchrony,
    ) -> Result<(), WlmError> {
        for host in self.hostnames() {
            let mut command = Vec::new();
            if !env.is_empty() {
                command.push("env".to_string());
                command.extend(env.iter().cloned());
            }
            command.extend(args.iter().cloned());
            ssh_exec(&self.ssh_opts, &host, &command)?;
        }
        Ok(())
    }

    fn is_running(&self) -> Result<bool, WlmError> {
        let out = subprocess::run_capture("apstat", &["-a".to_string(), self.apid.clone()])?;
        Ok(out.success() && out.stdout.contains(&self.apid))
    }

    fn deregister(&self) -> Result<(), WlmError> {
        for host in self.hostnames() {
            if let Err(err) = ssh_exec_allow_failure(
                &self.ssh_opts,
                &host,
                &["rm".to_string(), "-rf".to_string(),
                    self.toolpath.to_string_lossy().into_owned()],
            ) {
                warn!(host = %host, error = %err, "failed to remove ALPS toolhelper dir");
            }
        }
        self.helper.deregister_app(self.daemon_app_id)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "alps_tests.rs"]
mod tests;
