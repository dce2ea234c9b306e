// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process-wide frontend singleton.

use std::collections::HashMap;
use std::sync::Arc;

use cti_core::{AppId, Config, HostPlacement, ManifestId, Registry, SessionId, WlmType};
use cti_helper::HelperClient;
use cti_wlm::{detect, BarrierMode, JobLaunchSpec, JobRef, StdioFds, WlmDriver};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::app::App;
use crate::deps::{DependencyOracle, LddOracle};
use crate::error::{CtiError, StagingError};
use crate::manifest::{DepsPolicy, Manifest};
use crate::session::{ExecSpec, Session};

static INSTANCE: Mutex<Option<Arc<Frontend>>> = Mutex::new(None);

pub struct Frontend {
    config: Config,
    wlm: WlmType,
    driver: Box<dyn WlmDriver>,
    helper: Option<Arc<HelperClient>>,
    oracle: Arc<dyn DependencyOracle>,
    /// Strong side of the Frontend→App arena.
    apps: Mutex<HashMap<u64, Arc<App>>>,
    app_registry: Registry<App>,
    session_registry: Registry<Session>,
    manifest_registry: Registry<Manifest>,
    attributes: Mutex<HashMap<String, String>>,
    /// Stamped at construction; forked children must not tear down the
    /// parent's helper or jobs.
    original_pid: u32,
}

impl Frontend {
    /// The singleton, constructed on first use: WLM detection, driver
    /// instantiation, helper spawn and handshake.
    pub fn instance() -> Result<Arc<Frontend>, CtiError> {
        let mut instance = INSTANCE.lock();
        if let Some(frontend) = instance.as_ref() {
            return Ok(Arc::clone(frontend));
        }
        let frontend = Arc::new(Self::initialize()?);
        *instance = Some(Arc::clone(&frontend));
        Ok(frontend)
    }

    /// Drop the singleton. Call at process exit, not before.
    pub fn destroy() {
        let taken = INSTANCE.lock().take();
        drop(taken);
    }

    fn initialize() -> Result<Self, CtiError> {
        let config = Config::from_env()?;
        let wlm = detect::detect_wlm(&config);

        let helper = Arc::new(HelperClient::spawn(&config.helper_path()?)?);
        let driver = detect::new_driver(wlm, Arc::clone(&helper), config.clone())?;
        info!(wlm = %wlm, helper_pid = helper.helper_pid(), "frontend initialized");

        Ok(Self {
            config,
            wlm,
            driver,
            helper: Some(helper),
            oracle: Arc::new(LddOracle),
            apps: Mutex::new(HashMap::new()),
            app_registry: Registry::new(),
            session_registry: Registry::new(),
            manifest_registry: Registry::new(),
            attributes: Mutex::new(HashMap::new()),
            original_pid: std::process::id(),
        })
    }

    /// Frontend over an injected driver, for tests and embedding. No
    /// helper process is spawned.
    #[cfg(any(test, feature = "test-support"))]
    pub fn with_driver(config: Config, driver: Box<dyn WlmDriver>) -> Self {
        let wlm = driver.wlm_type();
        Self {
            config,
            wlm,
            driver,
            helper: None,
            oracle: Arc::new(LddOracle),
            apps: Mutex::new(HashMap::new()),
            app_registry: Registry::new(),
            session_registry: Registry::new(),
            manifest_registry: Registry::new(),
            attributes: Mutex::new(HashMap::new()),
            original_pid: std::process::id(),
        }
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn pretend_forked(&mut self) {
        // Any pid that is not ours marks this instance as a fork copy.
        self.original_pid = self.original_pid.wrapping_add(1);
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn current_wlm(&self) -> WlmType {
        self.wlm
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn is_original_instance(&self) -> bool {
        std::process::id() == self.original_pid
    }

    /// Hostname of the node this frontend runs on.
    pub fn hostname(&self) -> Result<String, CtiError> {
        Ok(std::fs::read_to_string("/proc/sys/kernel/hostname")?.trim().to_string())
    }

    // ----- attributes -----

    pub fn set_attribute(&self, key: &str, value: &str) -> Result<(), CtiError> {
        match key {
            "CTI_DEBUG" | "CTI_LOG_DIR" => {
                self.attributes.lock().insert(key.to_string(), value.to_string());
                Ok(())
            }
            other => Err(CtiError::Usage(format!("unknown attribute {other:?}"))),
        }
    }

    pub fn get_attribute(&self, key: &str) -> Option<String> {
        self.attributes.lock().get(key).cloned()
    }

    // ----- app lifecycle -----

    pub fn launch(
        &self,
        launcher_args: &[String],
        env: &[String],
        stdio: StdioFds,
    ) -> Result<AppId, CtiError> {
        self.launch_inner(launcher_args, env, stdio, BarrierMode::Run)
    }

    pub fn launch_barrier(
        &self,
        launcher_args: &[String],
        env: &[String],
        stdio: StdioFds,
    ) -> Result<AppId, CtiError> {
        self.launch_inner(launcher_args, env, stdio, BarrierMode::Hold)
    }

    fn launch_inner(
        &self,
        launcher_args: &[String],
        env: &[String],
        stdio: StdioFds,
        barrier: BarrierMode,
    ) -> Result<AppId, CtiError> {
        let spec = JobLaunchSpec {
            launcher_args: launcher_args.to_vec(),
            env: env.to_vec(),
            stdio,
        };
        let job = self.driver.launch(&spec, barrier)?;
        self.adopt_job(job)
    }

    /// Bind to a running job by its WLM id string. Registration with an id
    /// form belonging to a different WLM is a usage error.
    pub fn register_job(&self, id: &str) -> Result<AppId, CtiError> {
        let job_ref = JobRef::parse(self.wlm, id)
            .map_err(|err| CtiError::Usage(err.to_string()))?;
        self.attach_ref(&job_ref)
    }

    pub(crate) fn attach_ref(&self, job_ref: &JobRef) -> Result<AppId, CtiError> {
        let job = self.driver.attach(job_ref)?;
        self.adopt_job(job)
    }

    fn adopt_job(&self, job: Box<dyn cti_wlm::WlmJob>) -> Result<AppId, CtiError> {
        let id = AppId::new(self.app_registry.allocate());
        let app = App::new(id, job, self.effective_config())?;
        self.app_registry.register(id.raw(), &app);
        self.apps.lock().insert(id.raw(), app);
        info!(app = %id, "app registered");
        Ok(id)
    }

    pub fn app(&self, id: AppId) -> Result<Arc<App>, CtiError> {
        self.app_registry
            .get(id.raw())
            .ok_or_else(|| CtiError::invalid_handle("app", id.raw()))
    }

    /// Validity reflects liveness: a deregistered or exited app is
    /// invalid.
    pub fn app_is_valid(&self, id: AppId) -> bool {
        match self.app_registry.get(id.raw()) {
            Some(app) => app.job().is_running().unwrap_or(true),
            None => false,
        }
    }

    pub fn release_app_barrier(&self, id: AppId) -> Result<(), CtiError> {
        let app = self.app(id)?;
        match app.release_barrier() {
            Err(CtiError::Wlm(cti_wlm::WlmError::BarrierReleased)) => Err(CtiError::Usage(
                format!("app {id} is not held at the startup barrier"),
            )),
            other => other,
        }
    }

    pub fn kill_app(&self, id: AppId, signo: i32) -> Result<(), CtiError> {
        Ok(self.app(id)?.job().kill(signo)?)
    }

    /// Cascades: every Session of the App and every Manifest of those
    /// Sessions become invalid.
    pub fn deregister_app(&self, id: AppId) -> Result<(), CtiError> {
        let app = self.app(id)?;
        app.teardown();
        self.apps.lock().remove(&id.raw());
        self.app_registry.remove(id.raw());
        self.session_registry.sweep();
        self.manifest_registry.sweep();
        info!(app = %id, "app deregistered");
        Ok(())
    }

    // ----- app queries -----

    pub fn launcher_hostname(&self, id: AppId) -> Result<String, CtiError> {
        Ok(self.app(id)?.job().launcher_hostname()?)
    }

    pub fn num_app_pes(&self, id: AppId) -> Result<usize, CtiError> {
        Ok(self.app(id)?.job().num_pes())
    }

    pub fn num_app_nodes(&self, id: AppId) -> Result<usize, CtiError> {
        Ok(self.app(id)?.job().num_nodes())
    }

    pub fn app_hosts_list(&self, id: AppId) -> Result<Vec<String>, CtiError> {
        Ok(self.app(id)?.job().hostnames())
    }

    pub fn app_hosts_placement(&self, id: AppId) -> Result<Vec<HostPlacement>, CtiError> {
        Ok(self.app(id)?.job().placement())
    }

    pub fn app_binary_list(&self, id: AppId) -> Result<Vec<String>, CtiError> {
        Ok(self.app(id)?.job().binary_rank_map().into_keys().collect())
    }

    pub fn app_job_id(&self, id: AppId) -> Result<String, CtiError> {
        Ok(self.app(id)?.job().job_id())
    }

    // ----- sessions -----

    pub fn create_session(&self, app_id: AppId) -> Result<SessionId, CtiError> {
        let app = self.app(app_id)?;
        let id = SessionId::new(self.session_registry.allocate());
        let session = Session::new(id, &app)?;
        self.session_registry.register(id.raw(), &session);
        app.adopt_session(session);
        Ok(id)
    }

    pub fn session(&self, id: SessionId) -> Result<Arc<Session>, CtiError> {
        self.session_registry
            .get(id.raw())
            .ok_or_else(|| CtiError::invalid_handle("session", id.raw()))
    }

    pub fn session_is_valid(&self, id: SessionId) -> bool {
        self.session_registry.is_valid(id.raw())
    }

    pub fn destroy_session(&self, id: SessionId) -> Result<(), CtiError> {
        let session = self.session(id)?;
        session.destroy()?;
        if let Some(app) = session.app() {
            app.remove_session(id);
        }
        self.session_registry.remove(id.raw());
        self.manifest_registry.sweep();
        Ok(())
    }

    // ----- manifests -----

    pub fn create_manifest(&self, session_id: SessionId) -> Result<ManifestId, CtiError> {
        let session = self.session(session_id)?;
        let id = ManifestId::new(self.manifest_registry.allocate());
        let manifest = Arc::new(Manifest::new(id, Arc::downgrade(&session)));
        self.manifest_registry.register(id.raw(), &manifest);
        session.adopt_manifest(manifest);
        Ok(id)
    }

    pub fn manifest(&self, id: ManifestId) -> Result<Arc<Manifest>, CtiError> {
        self.manifest_registry
            .get(id.raw())
            .ok_or_else(|| CtiError::invalid_handle("manifest", id.raw()))
    }

    pub fn manifest_is_valid(&self, id: ManifestId) -> bool {
        // A consumed manifest keeps its registry entry until the session
        // goes away, but it no longer accepts anything.
        self.manifest_registry
            .get(id.raw())
            .map(|manifest| manifest.is_building())
            .unwrap_or(false)
    }

    pub fn add_manifest_binary(&self, id: ManifestId, path: &str) -> Result<(), CtiError> {
        self.manifest(id)?.add_binary(path, self.oracle.as_ref(), DepsPolicy::Stage)
    }

    pub fn add_manifest_library(&self, id: ManifestId, path: &str) -> Result<(), CtiError> {
        self.manifest(id)?.add_library(path, self.oracle.as_ref(), DepsPolicy::Stage)
    }

    pub fn add_manifest_lib_dir(&self, id: ManifestId, path: &str) -> Result<(), CtiError> {
        self.manifest(id)?.add_library_dir(path)
    }

    pub fn add_manifest_file(&self, id: ManifestId, path: &str) -> Result<(), CtiError> {
        self.manifest(id)?.add_file(path)
    }

    pub fn send_manifest(&self, id: ManifestId) -> Result<(), CtiError> {
        let manifest = self.manifest(id)?;
        let session = manifest.session().ok_or_else(|| {
            CtiError::Usage(format!("manifest {id}'s session is gone"))
        })?;
        session.send_manifest(&manifest, None)
    }

    /// Ship the manifest and start one tool daemon per compute node from
    /// inside the sandbox.
    pub fn exec_tool_daemon(
        &self,
        id: ManifestId,
        daemon_path: &str,
        args: &[String],
        env: &[String],
    ) -> Result<(), CtiError> {
        let manifest = self.manifest(id)?;
        let session = manifest.session().ok_or_else(|| {
            CtiError::Usage(format!("manifest {id}'s session is gone"))
        })?;

        manifest.add_binary(daemon_path, self.oracle.as_ref(), DepsPolicy::Stage)?;
        let staged_name = cti_core::paths::find_executable(daemon_path)
            .as_deref()
            .and_then(cti_core::paths::base_name)
            .ok_or_else(|| StagingError::NotFound {
                path: daemon_path.to_string(),
                search: "PATH",
            })?;

        session.send_manifest(
            &manifest,
            Some(ExecSpec {
                staged_name,
                args: args.to_vec(),
                env: env.to_vec(),
            }),
        )
    }

    // ----- WLM extension operations -----

    pub fn open_ops(&self) -> WlmOps<'_> {
        match self.wlm {
            WlmType::Slurm => WlmOps::Slurm(SlurmOps { fe: self }),
            WlmType::Pals => WlmOps::Pals(PalsOps { fe: self }),
            WlmType::Flux => WlmOps::Flux(FluxOps { fe: self }),
            _ => WlmOps::Generic,
        }
    }

    /// Config with per-process attribute overrides folded in.
    fn effective_config(&self) -> Config {
        let mut config = self.config.clone();
        let attributes = self.attributes.lock();
        if let Some(debug) = attributes.get("CTI_DEBUG") {
            config.debug = debug != "0";
        }
        if let Some(log_dir) = attributes.get("CTI_LOG_DIR") {
            config.log_dir = Some(log_dir.into());
        }
        config
    }
}

impl Drop for Frontend {
    fn drop(&mut self) {
        if !self.is_original_instance() {
            // A forked child inherited this state: touching the helper or
            // the jobs would tear down the parent's world. Leak instead.
            if let Some(helper) = &self.helper {
                helper.suppress();
            }
            let apps = std::mem::take(&mut *self.apps.lock());
            for (_, app) in apps {
                std::mem::forget(app);
            }
            return;
        }

        let apps = std::mem::take(&mut *self.apps.lock());
        for (_, app) in apps {
            app.teardown();
        }
        if let Some(helper) = &self.helper {
            if let Err(err) = helper.shutdown() {
                warn!(error = %err, "helper shutdown failed");
            }
        }
    }
}

/// WLM-specific extension table.
pub enum WlmOps<'a> {
    Slurm(SlurmOps<'a>),
    Pals(PalsOps<'a>),
    Flux(FluxOps<'a>),
    Generic,
}

pub struct SlurmOps<'a> {
    fe: &'a Frontend,
}

impl SlurmOps<'_> {
    pub fn register_job_step(&self, job_id: u32, step_id: u32) -> Result<AppId, CtiError> {
        self.fe.attach_ref(&JobRef::SlurmStep { job_id, step_id })
    }

    /// Submit a batch script and bind to its first step.
    pub fn submit_batch_script(
        &self,
        script: &str,
        sbatch_args: &[String],
    ) -> Result<AppId, CtiError> {
        let mut args = vec!["--parsable".to_string()];
        args.extend(sbatch_args.iter().cloned());
        args.push(script.to_string());
        let out = cti_wlm::subprocess::run_success("sbatch", &args)?;

        // --parsable prints `jobid[;cluster]`.
        let job_id: u32 = out
            .stdout
            .trim()
            .split(';')
            .next()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| {
                CtiError::Usage(format!("sbatch output {:?} has no job id", out.stdout.trim()))
            })?;
        self.register_job_step(job_id, 0)
    }
}

pub struct PalsOps<'a> {
    fe: &'a Frontend,
}

impl PalsOps<'_> {
    pub fn register_apid(&self, apid: &str) -> Result<AppId, CtiError> {
        self.fe.attach_ref(&JobRef::PalsApid(apid.to_string()))
    }
}

pub struct FluxOps<'a> {
    fe: &'a Frontend,
}

impl FluxOps<'_> {
    pub fn register_job(&self, job_id: &str) -> Result<AppId, CtiError> {
        self.fe.attach_ref(&JobRef::FluxJob(job_id.to_string()))
    }
}

#[cfg(test)]
#[path = "frontend_tests.rs"]
mod tests;
