// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flux driver: jobspec submission, eventlog tracking, filemap broadcast,
//! and alloc-bypass tool-daemon jobs.

mod eventlog;

pub use eventlog::{
    find_shell_init, nodelist_from_r, parse_libflux_version, parse_shell_init, tasks_per_node,
    ShellInit,
};

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cti_core::env as cti_env;
use cti_core::{Config, DaemonId, Proctable, ProctableEntry, WlmType};
use cti_helper::HelperClient;
use cti_wire::{LaunchData, RunMode};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{
    intersect_check_output, resolve_stdio, BarrierMode, JobLaunchSpec, JobRef, StdioFds,
    Synchrony, WlmDriver, WlmJob,
};
use crate::error::WlmError;
use crate::subprocess;

/// libflux-core version this driver was developed against. The C API and
/// CLI surfaces are not yet stable, so anything else is rejected unless
/// the operator opts out.
pub const FLUX_CORE_VERSION: &str = "0.49.0";

pub struct FluxDriver {
    helper: Arc<HelperClient>,
    config: Config,
    launcher: String,
}

impl FluxDriver {
    pub fn new(helper: Arc<HelperClient>, config: Config) -> Result<Self, WlmError> {
        let launcher = config.launcher_name.clone().unwrap_or_else(|| "flux".to_string());
        check_runtime_version(&launcher)?;
        Ok(Self { helper, config, launcher })
    }

    fn build_job(&self, job_id: String, held: bool) -> Result<FluxJob, WlmError> {
        // The shell.init event carries the leader rank and service key for
        // every subsequent shell RPC.
        let eventlog = subprocess::run_success(
            &self.launcher,
            &[
                "job".to_string(),
                "wait-event".to_string(),
                "--format=json".to_string(),
                "-p".to_string(),
                "guest.exec.eventlog".to_string(),
                job_id.clone(),
                "shell.init".to_string(),
            ],
        )?;
        let shell = find_shell_init(&eventlog.stdout)?;
        debug!(job = %job_id, leader_rank = shell.leader_rank, service = %shell.service,
            "job shell is up");

        let r_json = subprocess::run_success(
            &self.launcher,
            &["job".to_string(), "info".to_string(), job_id.clone(), "R".to_string()],
        )?
        .stdout;
        let nodelist = nodelist_from_r(&r_json)?;

        let taskmap = subprocess::run_success(
            &self.launcher,
            &["job".to_string(), "taskmap".to_string(), job_id.clone()],
        )?
        .stdout;
        let tasks = tasks_per_node(taskmap.trim(), &nodelist)?;

        // Task pids live on the remote shells; ranks and hosts are what
        // placement needs here.
        let mut entries = Vec::new();
        let mut rank = 0usize;
        for (host, count) in &tasks {
            for _ in 0..*count {
                entries.push(ProctableEntry {
                    rank,
                    hostname: host.clone(),
                    pid: 0,
                    executable: String::new(),
                });
                rank += 1;
            }
        }
        let proctable = Proctable::new(entries)?;

        let daemon_app_id = self.helper.register_app(0)?;
        Ok(FluxJob {
            helper: Arc::clone(&self.helper),
            launcher: self.launcher.clone(),
            daemon_app_id,
            held: Mutex::new(held),
            toolpath: self
                .config
                .backend_tmpdir
                .clone()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(format!("cti-{job_id}")),
            stage_dir: self.config.cfg_dir.clone(),
            job_id,
            shell,
            r_json,
            proctable,
        })
    }
}

impl WlmDriver for FluxDriver {
    fn wlm_type(&self) -> WlmType {
        WlmType::Flux
    }

    fn launcher_name(&self) -> String {
        self.launcher.clone()
    }

    fn launch(
        &self,
        spec: &JobLaunchSpec,
        barrier: BarrierMode,
    ) -> Result<Box<dyn WlmJob>, WlmError> {
        // Jobspec generation is delegated to the CLI's dry-run mode, then
        // submitted as-is.
        let mut dry_run = vec![
            "submit".to_string(),
            "--dry-run".to_string(),
        ];
        if barrier == BarrierMode::Hold {
            // Startup barrier: the job shell stops every task in exec
            // until it gets a SIGCONT.
            dry_run.push("-o".to_string());
            dry_run.push("stop-tasks-in-exec".to_string());
        }
        for env in &spec.env {
            dry_run.push(format!("--env={env}"));
        }
        dry_run.extend(spec.launcher_args.iter().cloned());
        let jobspec = subprocess::run_success(&self.launcher, &dry_run)?.stdout;

        let mut spec_file = tempfile::Builder::new()
            .prefix("jobspec.")
            .suffix(".json")
            .tempfile_in(&self.config.cfg_dir)?;
        spec_file.write_all(jobspec.as_bytes())?;
        spec_file.flush()?;

        let submit = subprocess::run_success(
            &self.launcher,
            &[
                "job".to_string(),
                "submit".to_string(),
                spec_file.path().to_string_lossy().into_owned(),
            ],
        )?;
        let job_id = submit.stdout.trim().to_string();
        if job_id.is_empty() {
            return Err(WlmError::Parse {
                tool: "flux",
                detail: "flux job submit printed no job id".to_string(),
            });
        }
        info!(job = %job_id, "submitted job");

        let job = self.build_job(job_id, barrier == BarrierMode::Hold)?;
        Ok(Box::new(job))
    }

    fn attach(&self, job: &JobRef) -> Result<Box<dyn WlmJob>, WlmError> {
        let JobRef::FluxJob(id) = job else {
            return Err(WlmError::BadJobRef(format!("{job:?}")));
        };

        let out = subprocess::run_capture(
            &self.launcher,
            &[
                "jobs".to_string(),
                "-n".to_string(),
                "-o".to_string(),
                "{state}".to_string(),
                id.clone(),
            ],
        )?;
        let state = out.stdout.trim();
        if !out.success() || state == "INACTIVE" || state.is_empty() {
            return Err(WlmError::NotRunning(id.clone()));
        }

        self.build_job(id.clone(), false).map(|job| Box::new(job) as Box<dyn WlmJob>)
    }
}

pub struct FluxJob {
    helper: Arc<HelperClient>,
    launcher: String,
    daemon_app_id: DaemonId,
    job_id: String,
    shell: ShellInit,
    /// Raw R object of the target job, reused for alloc-bypass daemons.
    r_json: String,
    proctable: Proctable,
    held: Mutex<bool>,
    toolpath: PathBuf,
    stage_dir: PathBuf,
}

impl FluxJob {
    pub fn shell_service(&self) -> &ShellInit {
        &self.shell
    }

    fn filemap_tag(&self) -> String {
        format!("cti-{}", self.job_id)
    }

    /// Run a command on every node of the job as an alloc-bypass job.
    fn bypass_job(
        &self,
        command: &[String],
        env: &[String],
        synchrony: Synchrony,
        stdout: Option<std::os::fd::RawFd>,
    ) -> Result<bool, WlmError> {
        // Oversubscription onto the job's resources needs the jobtap
        // plugin; loading twice is harmless.
        let _ = subprocess::run_capture(
            &self.launcher,
            &["jobtap".to_string(), "load".to_string(), "alloc-bypass.so".to_string()],
        );

        let num_nodes = self.num_nodes();
        let mut argv = vec![
            self.launcher.clone(),
            match synchrony {
                Synchrony::Sync => "run".to_string(),
                Synchrony::Async => "submit".to_string(),
            },
            format!("--nodes={num_nodes}"),
            format!("--ntasks={num_nodes}"),
            "--tasks-per-node=1".to_string(),
            format!("--setattr=system.alloc-bypass.R={}", self.r_json.trim()),
        ];
        for entry in env {
            argv.push(format!("--env={entry}"));
        }
        argv.extend(command.iter().cloned());

        let launch = LaunchData {
            file: self.launcher.clone(),
            argv,
            env: vec![],
            env_blacklist: vec![],
        };
        let stdio = StdioFds { stdin: None, stdout, stderr: None };
        let (_owners, raw) = resolve_stdio(&stdio)?;
        let mode = match synchrony {
            Synchrony::Sync => RunMode::Synchronous,
            Synchrony::Async => RunMode::Asynchronous,
        };
        Ok(self.helper.fork_execvp_util(self.daemon_app_id, mode, &launch, raw)?)
    }
}

impl WlmJob for FluxJob {
    fn wlm_type(&self) -> WlmType {
        WlmType::Flux
    }

    fn job_id(&self) -> String {
        self.job_id.clone()
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
        let mut held = self.held.lock();
        if !*held {
            return Err(WlmError::BarrierReleased);
        }
        // stop-tasks-in-exec holds every task in SIGSTOP; SIGCONT starts
        // the app.
        subprocess::run_success(
            &self.launcher,
            &[
                "job".to_string(),
                "kill".to_string(),
                "--signal=SIGCONT".to_string(),
                self.job_id.clone(),
            ],
        )?;
        *held = false;
        Ok(())
    }

    fn kill(&self, signo: i32) -> Result<(), WlmError> {
        subprocess::run_success(
            &self.launcher,
            &[
                "job".to_string(),
                "kill".to_string(),
                format!("--signal={signo}"),
                self.job_id.clone(),
            ],
        )
        .map(|_| ())
    }

    fn ship_package(&self, package: &Path, dest_name: &str) -> Result<(), WlmError> {
        let tag = self.filemap_tag();
        subprocess::run_success(
            &self.launcher,
            &[
                "filemap".to_string(),
                "create".to_string(),
                format!("--tags={tag}"),
                "--directory".to_string(),
                package
                    .parent()
                    .unwrap_or_else(|| Path::new("/"))
                    .to_string_lossy()
                    .into_owned(),
                package
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ],
        )?;

        // Fetch on every node, landing under the expected name.
        let fetch = format!(
            "mkdir -p {toolpath} && flux filemap get --tags={tag} --directory {toolpath} && \
             mv -f {toolpath}/{src} {toolpath}/{dest} 2>/dev/null || true",
            toolpath = self.toolpath.display(),
            src = package
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dest = dest_name,
        );
        let ok = self.bypass_job(
            &["sh".to_string(), "-c".to_string(), fetch],
            &[],
            Synchrony::Sync,
            None,
        )?;

        // The mapping has served its purpose either way.
        let _ = subprocess::run_capture(
            &self.launcher,
            &["filemap".to_string(), "unmap".to_string(), format!("--tags={tag}")],
        );

        if ok {
            Ok(())
        } else {
            Err(WlmError::CommandFailed {
                command: "flux filemap get".to_string(),
                status: 1,
                stderr: format!("failed to stage {} on job {}", package.display(), self.job_id),
            })
        }
    }

    fn start_daemon(
        &self,
        args: &[String],
        env: &[String],
        synchrony: Synchrony,
    ) -> Result<(), WlmError> {
        let ok = self.bypass_job(args, env, synchrony, None)?;
        if ok {
            Ok(())
        } else {
            Err(WlmError::CommandFailed {
                command: "flux run (tool daemon)".to_string(),
                status: 1,
                stderr: format!("tool daemon launch failed on job {}", self.job_id),
            })
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

        let (read, write) = nix::unistd::pipe().map_err(cti_helper::HelperError::from)?;
        let reader = std::thread::spawn(move || {
            use std::io::Read;
            let mut out = String::new();
            let mut file = std::fs::File::from(read);
            let _ = file.read_to_string(&mut out);
            out
        });

        use std::os::fd::AsRawFd;
        let _ = self.bypass_job(&command, &[], Synchrony::Sync, Some(write.as_raw_fd()))?;
        drop(write);
        let output = reader.join().unwrap_or_default();
        Ok(intersect_check_output(&output, self.num_nodes()))
    }

    fn is_running(&self) -> Result<bool, WlmError> {
        let out = subprocess::run_capture(
            &self.launcher,
            &[
                "jobs".to_string(),
                "-n".to_string(),
                "-o".to_string(),
                "{state}".to_string(),
                self.job_id.clone(),
            ],
        )?;
        let state = out.stdout.trim();
        Ok(out.success() && !state.is_empty() && state != "INACTIVE")
    }

    fn deregister(&self) -> Result<(), WlmError> {
        if let Err(err) = self.bypass_job(
            &[
                "rm".to_string(),
                "-rf".to_string(),
                self.toolpath.to_string_lossy().into_owned(),
            ],
            &[],
            Synchrony::Sync,
            None,
        ) {
            warn!(error = %err, "failed to remove Flux tool directory");
        }
        self.helper.deregister_app(self.daemon_app_id)?;
        Ok(())
    }
}

/// The Flux CLI/API surface is still moving; refuse to drive a runtime we
/// were not built against unless explicitly overridden.
fn check_runtime_version(launcher: &str) -> Result<(), WlmError> {
    if std::env::var_os(cti_env::FLUX_BYPASS_VERSION_CHECK_ENV).is_some() {
        return Ok(());
    }
    let out = subprocess::run_success(launcher, &["--version".to_string()])?;
    let runtime = parse_libflux_version(&out.stdout).ok_or_else(|| WlmError::Parse {
        tool: "flux",
        detail: "no libflux-core line in `flux --version` output".to_string(),
    })?;
    // Compare release numbers only; a local build hash may trail.
    let built = FLUX_CORE_VERSION.split('-').next().unwrap_or(FLUX_CORE_VERSION);
    if runtime == built {
        return Ok(());
    }
    Err(WlmError::Unsupported(format!(
        "Mismatch between system's libflux-core version ({runtime}) and this library's \
         built version ({built}). libflux-core is still in development. To bypass this \
         check, set the environment variable {} and relaunch the tool",
        cti_env::FLUX_BYPASS_VERSION_CHECK_ENV
    )))
}
