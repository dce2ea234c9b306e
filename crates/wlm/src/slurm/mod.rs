// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slurm driver: `srun` launches under MPIR, `sattach` layout queries,
//! `sbcast` file broadcast, `scancel` signalling.

mod layout;

pub use layout::{parse_step_layout, StepLayout};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cti_core::env as cti_env;
use cti_core::{Config, DaemonId, Proctable, WlmType};
use cti_helper::HelperClient;
use cti_wire::{LaunchData, RunMode, ShimData};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{
    proctable_from_wire, resolve_stdio, BarrierMode, JobLaunchSpec, JobRef, Synchrony, WlmDriver,
    WlmJob,
};
use crate::error::WlmError;
use crate::subprocess;

/// Staging root on Slurm compute nodes.
const SLURM_TOOL_DIR: &str = "/tmp";

/// Environment cleared out of the launcher so tool settings do not leak
/// into job steps started for the tool.
const SRUN_ENV_BLACKLIST: &[&str] = &[
    "SLURM_CPUS_PER_TASK",
    "SLURM_DISTRIBUTION",
    "SLURM_EPILOG",
    "SLURM_GRES",
    "SLURM_MEM_PER_CPU",
    "SLURM_MEM_PER_NODE",
    "SLURM_NPROCS",
    "SLURM_NTASKS",
    "SLURM_NTASKS_PER_CORE",
    "SLURM_NTASKS_PER_NODE",
    "SLURM_PARTITION",
    "SLURM_PROLOG",
    "SLURM_TASK_EPILOG",
    "SLURM_TASK_PROLOG",
    "SLURM_WORKING_DIR",
];

/// How long we poll for the launched step to reach RUNNING.
const STEP_POLL_TRIES: u32 = 3;
const STEP_POLL_DELAY: Duration = Duration::from_secs(1);

/// sbcast retry schedule for transient failures under load.
const SBCAST_RETRIES: u32 = 2;
const SBCAST_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct SlurmDriver {
    helper: Arc<HelperClient>,
    config: Config,
    launcher: String,
}

impl SlurmDriver {
    pub fn new(helper: Arc<HelperClient>, config: Config) -> Self {
        let launcher = config.launcher_name.clone().unwrap_or_else(|| "srun".to_string());
        Self { helper, config, launcher }
    }

    fn toolpath(&self) -> PathBuf {
        self.config
            .backend_tmpdir
            .clone()
            .unwrap_or_else(|| PathBuf::from(SLURM_TOOL_DIR))
    }

    fn blacklist(&self) -> Vec<String> {
        SRUN_ENV_BLACKLIST.iter().map(|s| s.to_string()).collect()
    }

    /// Walk hetjob components with sattach, stacking PE offsets.
    fn query_step_layouts(
        &self,
        job_id: u32,
        step_id: u32,
    ) -> Result<Vec<(String, StepLayout)>, WlmError> {
        let mut layouts = Vec::new();
        let mut pe_offset = 0usize;
        for component in 0u32.. {
            let id = if component == 0 {
                format!("{job_id}.{step_id}")
            } else {
                format!("{job_id}+{component}.{step_id}")
            };
            let output = subprocess::run_success(
                "sattach",
                &["--layout".to_string(), "-Q".to_string(), id.clone()],
            );
            match output {
                Ok(out) => {
                    let layout = parse_step_layout(&out.stdout, pe_offset)?;
                    pe_offset += layout.num_pes;
                    layouts.push((id, layout));
                }
                // First component must exist; later misses end the walk.
                Err(err) if component == 0 => return Err(err),
                Err(_) => break,
            }
        }
        Ok(layouts)
    }

    /// Poll until the job step is registered and RUNNING.
    fn wait_for_step(&self, job_id: u32) -> Result<(), WlmError> {
        let mut last = String::new();
        for attempt in 1..=STEP_POLL_TRIES {
            debug!(job_id, attempt, "waiting for job step to reach RUNNING");
            let out = subprocess::run_capture(
                "squeue",
                &["-h".to_string(), "-j".to_string(), job_id.to_string(), "-o".to_string(),
                    "%T".to_string()],
            )?;
            if out.success() && out.stdout.lines().any(|state| state.trim() == "RUNNING") {
                return Ok(());
            }
            last = if out.stdout.trim().is_empty() {
                out.stderr.trim().to_string()
            } else {
                out.stdout.trim().to_string()
            };
            std::thread::sleep(STEP_POLL_DELAY);
        }
        Err(WlmError::NotRunning(format!("job {job_id} never reached RUNNING ({last})")))
    }

    fn build_job(
        &self,
        job_id: u32,
        step_id: u32,
        daemon_app_id: DaemonId,
        mpir_id: Option<DaemonId>,
        proctable: Proctable,
        gres: Option<String>,
    ) -> Result<SlurmJob, WlmError> {
        let layouts = self.query_step_layouts(job_id, step_id)?;
        Ok(SlurmJob {
            helper: Arc::clone(&self.helper),
            launcher: self.launcher.clone(),
            container_instance: self.config.container_instance.clone(),
            never_parse_scancel: std::env::var_os(cti_env::SLURM_NEVER_PARSE_SCANCEL_ENV)
                .is_some(),
            job_id,
            step_id,
            daemon_app_id,
            mpir_id: Mutex::new(mpir_id),
            proctable,
            layouts,
            gres,
            toolpath: self.toolpath(),
            blacklist: self.blacklist(),
        })
    }
}

impl WlmDriver for SlurmDriver {
    fn wlm_type(&self) -> WlmType {
        WlmType::Slurm
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
            env_blacklist: self.blacklist(),
        };

        let (_owners, raw) = resolve_stdio(&spec.stdio)?;
        // Wrapped launchers need the shim dance; plain srun attaches
        // directly.
        let mpir = if self.config.launcher_script || self.config.launcher_wrapper.is_some() {
            let srun_path = cti_core::paths::find_executable(&self.launcher)
                .ok_or_else(|| WlmError::Unsupported(format!(
                    "launcher {:?} not found in PATH",
                    self.launcher
                )))?;
            let shim = ShimData {
                shim_binary: self
                    .config
                    .shim_path()
                    .map_err(|err| WlmError::Unsupported(err.to_string()))?
                    .to_string_lossy()
                    .into_owned(),
                shim_bin_dir_base: self
                    .config
                    .cfg_dir
                    .join("shim.")
                    .to_string_lossy()
                    .into_owned(),
                shimmed_launcher: srun_path.to_string_lossy().into_owned(),
            };
            self.helper.launch_mpir_shim(&shim, &launch, raw)?
        } else {
            self.helper.launch_mpir(&launch, raw)?
        };

        let job_id = mpir.job_id;
        let step_id = mpir.step_id;
        info!(job_id, step_id, pid = mpir.launcher_pid, "srun stopped at startup barrier");
        let proctable = proctable_from_wire(&mpir.proctable)?;

        self.wait_for_step(job_id)?;

        let gres = find_gres_setting(&spec.launcher_args);
        let daemon_id = DaemonId::new(mpir.id);
        let mut job = self.build_job(job_id, step_id, daemon_id, Some(daemon_id), proctable, gres)?;

        // Under a per-rank wrapper (container runtime etc.) the proctable
        // holds wrapper pids; swap in each wrapper's first child.
        if self.config.backend_wrapper.is_some() {
            let dlaunch = self
                .config
                .dlaunch_path()
                .map_err(|err| WlmError::Unsupported(err.to_string()))?;
            job.reparent_proctable(&dlaunch)?;
        }

        if barrier == BarrierMode::Run {
            job.release_barrier()?;
        }
        Ok(Box::new(job))
    }

    fn attach(&self, job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError> {
        let JobRef::SlurmStep { job_id, step_id } = job else {
            return Err(WlmError::BadJobRef(format!("{job:?}")));
        };

        // sattach speaks MPIR for running steps; drive it to the barrier,
        // take the proctable, then drop it.
        let sattach_argv = vec![
            "sattach".to_string(),
            "-Q".to_string(),
            format!("{job_id}.{step_id}"),
        ];
        let launch = LaunchData {
            file: "sattach".to_string(),
            argv: sattach_argv,
            env: vec![],
            env_blacklist: self.blacklist(),
        };
        let (_owners, raw) = resolve_stdio(&crate::driver::StdioFds::default())?;
        let mpir = self.helper.launch_mpir(&launch, raw).map_err(|err| {
            WlmError::NotRunning(format!("job {job_id}.{step_id} is not attachable: {err}"))
        })?;
        let proctable = proctable_from_wire(&mpir.proctable)?;
        let sattach_id = DaemonId::new(mpir.id);
        let _ = self.helper.terminate_mpir(sattach_id);

        // Register an app entry to own utilities for this attach.
        let daemon_app_id = self.helper.register_app(0)?;
        let job = self.build_job(*job_id, *step_id, daemon_app_id, None, proctable, None)?;
        Ok(Box::new(job))
    }
}

pub struct SlurmJob {
    helper: Arc<HelperClient>,
    launcher: String,
    container_instance: Option<String>,
    never_parse_scancel: bool,
    job_id: u32,
    step_id: u32,
    daemon_app_id: DaemonId,
    /// Present while the job is held at the startup barrier.
    mpir_id: Mutex<Option<DaemonId>>,
    proctable: Proctable,
    layouts: Vec<(String, StepLayout)>,
    gres: Option<String>,
    toolpath: PathBuf,
    blacklist: Vec<String>,
}

impl SlurmJob {
    pub fn step_layouts(&self) -> &[(String, StepLayout)] {
        &self.layouts
    }

    fn scancel_quiet(&self, signo: i32) -> Result<(), WlmError> {
        let args = vec![
            "-Q".to_string(),
            "-s".to_string(),
            signo.to_string(),
            format!("{}.{}", self.job_id, self.step_id),
        ];
        subprocess::run_success("scancel", &args).map(|_| ()).map_err(|_| {
            WlmError::CommandFailed {
                command: "scancel".to_string(),
                status: 1,
                stderr: format!("failed to send signal to job ID {}", self.job_id),
            }
        })
    }

    /// PE-45572: scancel can report failure for a delivered signal.
    /// Verbose output is authoritative either way.
    fn scancel_verbose(&self, signo: i32) -> Result<(), WlmError> {
        let args = vec![
            "-v".to_string(),
            "-s".to_string(),
            signo.to_string(),
            format!("{}.{}", self.job_id, self.step_id),
        ];
        let out = subprocess::run_capture("scancel", &args)?;
        if scancel_output_reports_delivery(&out.stderr) || scancel_output_reports_delivery(&out.stdout)
        {
            return Ok(());
        }
        Err(WlmError::CommandFailed {
            command: "scancel -v".to_string(),
            status: out.status,
            stderr: format!(
                "failed to send signal to job ID {}: {}",
                self.job_id,
                out.stderr.trim()
            ),
        })
    }

    /// srun argv for per-node daemon execution, honoring hetjob components.
    fn daemon_launcher_argv(&self, daemon_args: &[String]) -> Vec<String> {
        let mut argv = vec![self.launcher.clone(), "--output=none".to_string()];
        let mut first = true;
        for (id, layout) in &self.layouts {
            if !first {
                argv.push(":".to_string());
            }
            first = false;

            argv.push(format!("--jobid={}", id.split('.').next().unwrap_or(id)));
            argv.push(format!("--gres={}", self.gres.as_deref().unwrap_or("none")));
            argv.push("--mem-per-cpu=0".to_string());
            argv.push("--mem_bind=no".to_string());
            argv.push("--cpu_bind=no".to_string());
            argv.push("--share".to_string());
            argv.push("--ntasks-per-node=1".to_string());
            argv.push(format!("--nodes={}", layout.num_nodes()));
            argv.push(format!(
                "--nodelist={}",
                layout
                    .nodes
                    .iter()
                    .map(|n| n.hostname.clone())
                    .collect::<Vec<_>>()
                    .join(",")
            ));
            argv.push("--disable-status".to_string());
            argv.push("--quiet".to_string());
            argv.push("--mpi=none".to_string());
            argv.push("--input=none".to_string());
            argv.push("--error=none".to_string());

            // Container wrapping happens on the compute node.
            if let Some(instance) = &self.container_instance {
                argv.push("singularity".to_string());
                argv.push("exec".to_string());
                argv.push(instance.clone());
            }
            argv.extend(daemon_args.iter().cloned());
        }
        argv
    }

    /// Replace wrapper pids in the proctable with their first children.
    /// Ships the backend launcher up front since nothing is staged yet.
    fn reparent_proctable(&mut self, dlaunch: &Path) -> Result<(), WlmError> {
        self.ship_package(dlaunch, cti_env::DLAUNCH_BINARY)?;

        let mut daemon_args = vec![
            self.toolpath.join(cti_env::DLAUNCH_BINARY).to_string_lossy().into_owned(),
        ];
        for entry in self.proctable.entries() {
            daemon_args.push("--first-child".to_string());
            daemon_args.push(entry.pid.to_string());
        }

        let (read, write) = nix::unistd::pipe().map_err(cti_helper::HelperError::from)?;
        let reader = std::thread::spawn(move || {
            use std::io::Read;
            let mut out = String::new();
            let mut file = std::fs::File::from(read);
            let _ = file.read_to_string(&mut out);
            out
        });

        use std::os::fd::AsRawFd;
        let ok = self.run_daemon(&daemon_args, &[], Synchrony::Sync, Some(write.as_raw_fd()))?;
        drop(write);
        let output = reader.join().unwrap_or_default();
        if !ok {
            return Err(WlmError::CommandFailed {
                command: "srun (reparent)".to_string(),
                status: 1,
                stderr: "wrapper child discovery failed".to_string(),
            });
        }

        // Lines of `<wrapper-pid> <child-pid>`.
        let mut remap = std::collections::HashMap::new();
        for line in output.lines() {
            if let Some((parent, child)) = line.trim().split_once(' ') {
                if let (Ok(parent), Ok(child)) = (parent.parse::<i32>(), child.parse::<i32>()) {
                    remap.insert(parent, child);
                }
            }
        }

        let entries = self
            .proctable
            .entries()
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                if let Some(child) = remap.get(&entry.pid) {
                    entry.pid = *child;
                }
                entry
            })
            .collect();
        self.proctable = Proctable::new(entries)?;
        Ok(())
    }

    fn run_daemon(
        &self,
        daemon_args: &[String],
        env: &[String],
        synchrony: Synchrony,
        stdout: Option<std::os::fd::RawFd>,
    ) -> Result<bool, WlmError> {
        let argv = self.daemon_launcher_argv(daemon_args);
        let launch = LaunchData {
            file: self.launcher.clone(),
            argv,
            env: env.to_vec(),
            env_blacklist: self.blacklist.clone(),
        };
        let stdio = crate::driver::StdioFds { stdin: None, stdout, stderr: None };
        let (_owners, raw) = resolve_stdio(&stdio)?;
        let mode = match synchrony {
            Synchrony::Sync => RunMode::Synchronous,
            Synchrony::Async => RunMode::Asynchronous,
        };
        Ok(self.helper.fork_execvp_util(self.daemon_app_id, mode, &launch, raw)?)
    }
}

impl WlmJob for SlurmJob {
    fn wlm_type(&self) -> WlmType {
        WlmType::Slurm
    }

    fn job_id(&self) -> String {
        format!("{}.{}", self.job_id, self.step_id)
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
        local_hostname()
    }

    fn release_barrier(&self) -> Result<(), WlmError> {
        let id = self
            .mpir_id
            .lock()
            .take()
            .ok_or(WlmError::BarrierReleased)?;
        self.helper.release_mpir(id)?;
        info!(job_id = self.job_id, "released startup barrier");
        Ok(())
    }

    fn kill(&self, signo: i32) -> Result<(), WlmError> {
        if self.never_parse_scancel {
            self.scancel_quiet(signo)
        } else {
            self.scancel_verbose(signo)
        }
    }

    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError> {
        let args = vec![
            "-C".to_string(),
            "-j".to_string(),
            self.job_id.to_string(),
            package.to_string_lossy().into_owned(),
            "--force".to_string(),
            self.toolpath.join(dest_name).to_string_lossy().into_owned(),
        ];
        // SchedMD bug 15132: send-libs chokes on non-executable payloads.
        let env = [("SBCAST_SEND_LIBS".to_string(), "no".to_string())];

        let mut attempt = 0;
        loop {
            let out = subprocess::run_capture_env("sbcast", &args, &env)?;
            if out.success() {
                return Ok(());
            }
            if attempt >= SBCAST_RETRIES {
                return Err(WlmError::CommandFailed {
                    command: format!("sbcast {}", args.join(" ")),
                    status: out.status,
                    stderr: format!(
                        "Failed to ship {} package to compute nodes: {}",
                        package.display(),
                        out.stderr.trim()
                    ),
                });
            }
            attempt += 1;
            warn!(attempt, "sbcast failed, retrying");
            std::thread::sleep(SBCAST_RETRY_DELAY);
        }
    }

    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        synchrony: Synchrony,
    ) -> Result<(), WlmError> {
        let ok = self.run_daemon(args, env, synchrony, None)?;
        if ok {
            Ok(())
        } else {
            Err(WlmError::CommandFailed {
                command: "srun (tool daemon)".to_string(),
                status: 1,
                stderr: format!("tool daemon launch failed on job {}", self.job_id()),
            })
        }
    }

    fn check_files(&self, paths: &BTreeSet<PathBuf>) -> Result<BTreeSet<PathBuf>, WlmError> {
        if paths.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mut daemon_args = vec![self
            .toolpath
            .join(cti_env::DLAUNCH_BINARY)
            .to_string_lossy()
            .into_owned()];
        for path in paths {
            daemon_args.push("--check-file".to_string());
            daemon_args.push(path.to_string_lossy().into_owned());
        }

        let (read, write) = nix::unistd::pipe().map_err(cti_helper::HelperError::from)?;
        let reader = std::thread::spawn(move || {
            use std::io::Read;
            let mut out = String::new();
            let mut file = std::fs::File::from(read);
            let _ = file.read_to_string(&mut out);
            out
        });

        use std::os::fd::AsRawFd;
        let ok = self.run_daemon(&daemon_args, &[], Synchrony::Sync, Some(write.as_raw_fd()))?;
        drop(write);
        let output = reader.join().unwrap_or_default();
        if !ok {
            debug!(job = %self.job_id(), "check-files daemon reported failure");
        }

        Ok(crate::driver::intersect_check_output(&output, self.num_nodes()))
    }

    fn is_running(&self) -> Result<bool, WlmError> {
        let out = subprocess::run_capture(
            "squeue",
            &["-h".to_string(), "-j".to_string(), self.job_id.to_string(), "-o".to_string(),
                "%T".to_string()],
        )?;
        Ok(out.success()
            && out
                .stdout
                .lines()
                .any(|state| matches!(state.trim(), "RUNNING" | "COMPLETING" | "PENDING")))
    }

    fn deregister(&self) -> Result<(), WlmError> {
        self.helper.deregister_app(self.daemon_app_id)?;
        Ok(())
    }
}

/// Both shapes scancel is known to emit when the signal was delivered.
pub fn scancel_output_reports_delivery(output: &str) -> bool {
    output.lines().any(|line| {
        line.contains("Terminating step")
            || (line.contains("Signal ") && line.contains(" to step"))
    })
}

/// Pick up a `--gres` setting from the tool's launcher arguments so daemon
/// steps request the same resources.
pub fn find_gres_setting(launcher_args: &[String]) -> Option<String> {
    let mut args = launcher_args.iter();
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--gres=") {
            return Some(value.to_string());
        }
        if arg == "--gres" {
            return args.next().cloned();
        }
    }
    None
}

pub(crate) fn local_hostname() -> Result<String, WlmError> {
    Ok(std::fs::read_to_string("/proc/sys/kernel/hostname")?.trim().to_string())
}

#[cfg(test)]
#[path = "slurm_tests.rs"]
mod tests;
