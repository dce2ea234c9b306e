// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PALS driver: `mpiexec` under MPIR, `palstat` queries, `palscp` file
//! broadcast, `palscmd` remote execution, `palsig` signalling.

mod palstat;

pub use palstat::{find_apid_for_pbs_job, parse_jobs, parse_proctable, PalstatJob};

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cti_core::env as cti_env;
use cti_core::{Config, DaemonId, Proctable, WlmType};
use cti_helper::HelperClient;
use cti_wire::{LaunchData, RunMode};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{
    intersect_check_output, proctable_from_wire, resolve_stdio, BarrierMode, JobLaunchSpec,
    JobRef, StdioFds, Synchrony, WlmDriver, WlmJob,
};
use crate::error::WlmError;
use crate::subprocess;

/// apid discovery polling when a PBS job is still materializing.
const APID_POLL_TRIES: u32 = 10;
const APID_POLL_DELAY: Duration = Duration::from_secs(3);

pub struct PalsDriver {
    helper: Arc<HelperClient>,
    config: Config,
    launcher: String,
}

impl PalsDriver {
    pub fn new(helper: Arc<HelperClient>, config: Config) -> Self {
        let launcher = config.launcher_name.clone().unwrap_or_else(|| "mpiexec".to_string());
        Self { helper, config, launcher }
    }

    fn build_job(
        &self,
        apid: String,
        exec_host: String,
        daemon_app_id: DaemonId,
        mpir_id: Option<DaemonId>,
        proctable: Proctable,
    ) -> Result<PalsJob, WlmError> {
        let release_delay = std::env::var(cti_env::PALS_BARRIER_RELEASE_DELAY_ENV)
            .ok()
            .and_then(|delay| delay.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO);

        let job = PalsJob {
            helper: Arc::clone(&self.helper),
            daemon_app_id,
            mpir_id: Mutex::new(mpir_id),
            toolpath: PathBuf::from(format!("/tmp/cti-{apid}")),
            attribs_path: PathBuf::from(format!("/var/run/palsd/{apid}")),
            stage_dir: self.config.cfg_dir.clone(),
            apid,
            exec_host,
            proctable,
            release_delay,
        };
        job.remote_command_sync(&["mkdir".to_string(), "-p".to_string(),
            job.toolpath.to_string_lossy().into_owned()])?;
        Ok(job)
    }
}

impl WlmDriver for PalsDriver {
    fn wlm_type(&self) -> WlmType {
        WlmType::Pals
    }

    fn launcher_name(&self) -> String {
        self.launcher.clone()
    }

    fn launch(
        &self,
        spec: &JobLaunchSpec,
        barrier: BarrierMode,
    ) -> Result<Box<dyn WlmJob>, WlmError> {
        let exec_host = pbs_exec_host()?;

        let mut argv = vec![self.launcher.clone()];
        argv.extend(spec.launcher_args.iter().cloned());

        let mut env = spec.env.clone();
        // PE-34329: raise the launcher's RPC timeout for large apps, and
        // always send launch events to the PALS service.
        if self.launcher == "aprun" {
            env.push("APRUN_RPC_TIMEOUT=300".to_string());
            env.push("APRUN_LOCAL_LAUNCH=0".to_string());
        } else {
            env.push("PALS_RPC_TIMEOUT=300".to_string());
            env.push("PALS_LOCAL_LAUNCH=0".to_string());
        }

        let launch = LaunchData {
            file: self.launcher.clone(),
            argv,
            env,
            env_blacklist: vec![],
        };
        let (_owners, raw) = resolve_stdio(&spec.stdio)?;
        let mpir = self.helper.launch_mpir(&launch, raw).map_err(|err| {
            if std::env::var_os("PALS_HOSTLIST").is_none()
                && std::env::var_os("PALS_HOSTFILE").is_none()
                && std::env::var_os("PBS_NODEFILE").is_none()
            {
                return WlmError::Unsupported(
                    "Launcher failed to start application. PALS_HOSTLIST, PALS_HOSTFILE, \
                     and PBS_NODEFILE were not set. Ensure you are launching inside an \
                     active PBS allocation"
                        .to_string(),
                );
            }
            err.into()
        })?;

        let mpir_id = DaemonId::new(mpir.id);
        let apid = self.helper.read_string_mpir(mpir_id, "totalview_jobid")?;
        info!(apid = %apid, "launcher reported PALS application id");
        let proctable = proctable_from_wire(&mpir.proctable)?;

        let job = self.build_job(apid, exec_host, mpir_id, Some(mpir_id), proctable)?;
        if barrier == BarrierMode::Run {
            job.release_barrier()?;
        }
        Ok(Box::new(job))
    }

    fn attach(&self, job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError> {
        let JobRef::PalsApid(id) = job else {
            return Err(WlmError::BadJobRef(format!("{job:?}")));
        };
        let exec_host = pbs_exec_host()?;

        // A dotted id is a PBS job id; the PALS apid appears once palsd
        // has started the application, so poll for it.
        let apid = if id.contains('.') {
            resolve_apid(&exec_host, id)?
        } else {
            id.clone()
        };

        let out = subprocess::run_success(
            "palstat",
            &["-n".to_string(), exec_host.clone(), "-p".to_string(), apid.clone()],
        )
        .map_err(|err| {
            WlmError::NotRunning(format!(
                "no PALS application {apid}: {err}. Check with `palstat -n {exec_host}`"
            ))
        })?;
        let proctable = parse_proctable(&out.stdout)?;

        let daemon_app_id = self.helper.register_app(0)?;
        let job = self.build_job(apid, exec_host, daemon_app_id, None, proctable)?;
        Ok(Box::new(job))
    }
}

pub struct PalsJob {
    helper: Arc<HelperClient>,
    daemon_app_id: DaemonId,
    mpir_id: Mutex<Option<DaemonId>>,
    apid: String,
    exec_host: String,
    proctable: Proctable,
    toolpath: PathBuf,
    attribs_path: PathBuf,
    stage_dir: PathBuf,
    release_delay: Duration,
}

impl PalsJob {
    /// Run a command on the application's nodes through `palscmd`, waiting
    /// for completion.
    fn remote_command_sync(&self, command: &[String]) -> Result<(), WlmError> {
        let mut argv = vec![
            "palscmd".to_string(),
            "-n".to_string(),
            self.exec_host.clone(),
            self.apid.clone(),
        ];
        argv.extend(command.iter().cloned());
        let launch = LaunchData {
            file: "palscmd".to_string(),
            argv,
            env: vec![],
            env_blacklist: vec![],
        };
        let (_owners, raw) = resolve_stdio(&StdioFds::default())?;
        let ok = self
            .helper
            .fork_execvp_util(self.daemon_app_id, RunMode::Synchronous, &launch, raw)?;
        if ok {
            Ok(())
        } else {
            Err(WlmError::CommandFailed {
                command: format!("palscmd {}", command.join(" ")),
                status: 1,
                stderr: format!("remote command failed on application {}", self.apid),
            })
        }
    }
}

impl WlmJob for PalsJob {
    fn wlm_type(&self) -> WlmType {
        WlmType::Pals
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
        Some(self.attribs_path.clone())
    }

    fn launcher_hostname(&self) -> Result<String, WlmError> {
        Ok(self.exec_host.clone())
    }

    fn release_barrier(&self) -> Result<(), WlmError> {
        let id = self.mpir_id.lock().take().ok_or(WlmError::BarrierReleased)?;
        self.helper.release_mpir(id)?;
        // Configurable settle delay for the startup race seen in PALS
        // 1.2.3; zero by default.
        if !self.release_delay.is_zero() {
            debug!(delay_s = self.release_delay.as_secs(), "post-release delay");
            std::thread::sleep(self.release_delay);
        }
        Ok(())
    }

    fn kill(&self, signo: i32) -> Result<(), WlmError> {
        subprocess::run_success(
            "palsig",
            &[
                "-n".to_string(),
                self.exec_host.clone(),
                "-s".to_string(),
                signo.to_string(),
                self.apid.clone(),
            ],
        )
        .map(|_| ())
    }

    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError> {
        // PE-49724: palscp silently skips the execution host unless it
        // leads the host list.
        let mut hosts = self.hostnames();
        let exec_prefix = self.exec_host.split('.').next().unwrap_or(&self.exec_host);
        if let Some(pos) = hosts.iter().position(|h| h.starts_with(exec_prefix)) {
            hosts.swap(0, pos);
        } else {
            warn!(exec_host = %self.exec_host, "execution host not in job host list");
        }

        let mut host_file = tempfile::Builder::new()
            .prefix("hosts.")
            .tempfile_in(&self.stage_dir)?;
        for host in &hosts {
            writeln!(host_file, "{host}")?;
        }
        host_file.flush()?;

        let launch = LaunchData {
            file: "palscp".to_string(),
            argv: vec![
                "palscp".to_string(),
                "-l".to_string(),
                host_file.path().to_string_lossy().into_owned(),
                "-f".to_string(),
                package.to_string_lossy().into_owned(),
                "-d".to_string(),
                dest_name.to_string(),
                self.apid.clone(),
            ],
            env: vec![],
            env_blacklist: vec![],
        };
        let (_owners, raw) = resolve_stdio(&StdioFds::default())?;
        let ok = self
            .helper
            .fork_execvp_util(self.daemon_app_id, RunMode::Synchronous, &launch, raw)?;
        if !ok {
            return Err(WlmError::CommandFailed {
                command: "palscp".to_string(),
                status: 1,
                stderr: format!("failed to ship {} to application {}", package.display(), self.apid),
            });
        }

        // The palsd files directory is mounted noexec; move the payload
        // into the tool directory before anything tries to run it.
        let palscp_dest = format!("/var/run/palsd/{}/files/{dest_name}", self.apid);
        self.remote_command_sync(&[
            "mv".to_string(),
            palscp_dest,
            self.toolpath.to_string_lossy().into_owned(),
        ])
    }

    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        synchrony: Synchrony,
    ) -> Result<(), WlmError> {
        // palscmd has no environment forwarding; route through env(1).
        let mut command = Vec::new();
        if !env.is_empty() {
            command.push("env".to_string());
            command.extend(env.iter().cloned());
        }
        command.extend(args.iter().cloned());

        match synchrony {
            Synchrony::Sync => self.remote_command_sync(&command),
            Synchrony::Async => {
                let mut argv = vec![
                    "palscmd".to_string(),
                    "-n".to_string(),
                    self.exec_host.clone(),
                    self.apid.clone(),
                ];
                argv.extend(command);
                let launch = LaunchData {
                    file: "palscmd".to_string(),
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
                Ok(())
            }
        }
    }

    fn check_files(&self, paths: &BTreeSet<PathBuf>) -> Result<BTreeSet<PathBuf>, WlmError> {
        if paths.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut command = vec![self
            .toolpath
            .join(cti_env::DLAUNCH_BINARY)
            .to_string_lossy()
            .into_owned()];
        for path in paths {
            command.push("--check-file".to_string());
            command.push(path.to_string_lossy().into_owned());
        }

        let mut argv = vec![
            "palscmd".to_string(),
            "-n".to_string(),
            self.exec_host.clone(),
            self.apid.clone(),
        ];
        argv.extend(command);
        let launch = LaunchData {
            file: "palscmd".to_string(),
            argv,
            env: vec![],
            env_blacklist: vec![],
        };

        let (read, write) = nix::unistd::pipe().map_err(cti_helper::HelperError::from)?;
        let reader = std::thread::spawn(move || {
            use std::io::Read;
            let mut out = String::new();
            let mut file = std::fs::File::from(read);
            let _ = file.read_to_string(&mut out);
            out
        });

        use std::os::fd::AsRawFd;
        let stdio = StdioFds { stdin: None, stdout: Some(write.as_raw_fd()), stderr: None };
        let (_owners, raw) = resolve_stdio(&stdio)?;
        let _ = self
            .helper
            .fork_execvp_util(self.daemon_app_id, RunMode::Synchronous, &launch, raw)?;
        drop(write);
        let output = reader.join().unwrap_or_default();

        Ok(intersect_check_output(&output, self.num_nodes()))
    }

    fn is_running(&self) -> Result<bool, WlmError> {
        let out = subprocess::run_capture(
            "palstat",
            &["-n".to_string(), self.exec_host.clone(), self.apid.clone()],
        )?;
        if !out.success() {
            return Ok(false);
        }
        Ok(parse_jobs(&out.stdout)
            .iter()
            .any(|job| job.apid == self.apid && job.state != "Exited"))
    }

    fn deregister(&self) -> Result<(), WlmError> {
        // Sandbox teardown is best-effort; the node cleans /tmp anyway.
        if let Err(err) = self.remote_command_sync(&[
            "rm".to_string(),
            "-rf".to_string(),
            self.toolpath.to_string_lossy().into_owned(),
        ]) {
            warn!(error = %err, "failed to remove PALS tool directory");
        }
        self.helper.deregister_app(self.daemon_app_id)?;
        Ok(())
    }
}

/// Execution host: the first line of `$PBS_NODEFILE`.
fn pbs_exec_host() -> Result<String, WlmError> {
    let nodefile = std::env::var("PBS_NODEFILE").map_err(|_| {
        WlmError::Unsupported(
            "PBS_NODEFILE is not set. Ensure you are inside an active PBS allocation"
                .to_string(),
        )
    })?;
    let contents = std::fs::read_to_string(&nodefile)?;
    contents
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| WlmError::Parse {
            tool: "palstat",
            detail: format!("failed to parse PBS_NODEFILE at {nodefile}"),
        })
}

/// Poll `palstat` until the PBS job's application shows up.
fn resolve_apid(exec_host: &str, pbs_job_id: &str) -> Result<String, WlmError> {
    let tries = if std::env::var_os(cti_env::PALS_NO_POLL_ENV).is_some() {
        1
    } else {
        APID_POLL_TRIES
    };

    for attempt in 1..=tries {
        let out = subprocess::run_capture(
            "palstat",
            &["--node".to_string(), exec_host.to_string()],
        )?;
        if out.success() {
            if let Some(apid) = find_apid_for_pbs_job(&out.stdout, pbs_job_id) {
                return Ok(apid);
            }
        }
        if attempt < tries {
            debug!(attempt, pbs_job_id, "application not yet visible in palstat");
            std::thread::sleep(APID_POLL_DELAY);
        }
    }
    Err(WlmError::NotRunning(format!(
        "no PALS application for PBS job {pbs_job_id}. \
         Check for this job by running `palstat --node {exec_host}`"
    )))
}
