// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-App staging context: the remote sandbox, the dedup map of shipped
//! names, and manifest transfer.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use cti_archive::ArchiveBuilder;
use cti_core::env as cti_env;
use cti_core::{ManifestId, SessionId};
use cti_wlm::Synchrony;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::app::App;
use crate::error::CtiError;
use crate::manifest::{Manifest, PendingFile};

/// A tool daemon start riding on a manifest transfer.
pub(crate) struct ExecSpec {
    pub staged_name: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

#[derive(Debug, Clone)]
struct StagedEntry {
    source: PathBuf,
}

#[derive(Default)]
struct SessionState {
    /// staged name → canonical source. Exactly the union of successfully
    /// sent manifests.
    staged: HashMap<String, StagedEntry>,
    /// Strong side of the Session→Manifest arena.
    manifests: HashMap<ManifestId, Arc<Manifest>>,
    lock_files: Vec<PathBuf>,
    shipped_count: u64,
    daemon_count: u64,
    control_sent: bool,
}

pub struct Session {
    id: SessionId,
    app: Weak<App>,
    /// Sandbox directory name, unique per session.
    name: String,
    remote_root: PathBuf,
    /// Local scratch for archives; removed on drop.
    stage_dir: tempfile::TempDir,
    /// Serializes transfers against this session.
    transfer_lock: Mutex<()>,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(id: SessionId, app: &Arc<App>) -> Result<Arc<Self>, CtiError> {
        let wlm = app.job().wlm_type();
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("cti-{}-{}", wlm, &tag[..8]);
        let remote_root = app.job().toolpath().join(&name);

        let stage_dir = tempfile::Builder::new()
            .prefix(&format!("{name}."))
            .tempdir_in(&app.config().cfg_dir)?;

        debug!(session = %id, sandbox = %remote_root.display(), "session created");
        Ok(Arc::new(Self {
            id,
            app: Arc::downgrade(app),
            name,
            remote_root,
            stage_dir,
            transfer_lock: Mutex::new(()),
            state: Mutex::new(SessionState::default()),
        }))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn app(&self) -> Option<Arc<App>> {
        self.app.upgrade()
    }

    // Sandbox layout accessors, mirrored by the backend library.

    pub fn root_dir(&self) -> PathBuf {
        self.remote_root.clone()
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.remote_root.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.remote_root.join("lib")
    }

    pub fn file_dir(&self) -> PathBuf {
        self.remote_root.clone()
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.remote_root.join("tmp")
    }

    /// Arrival markers for every successfully sent manifest.
    pub fn lock_files(&self) -> Vec<PathBuf> {
        self.state.lock().lock_files.clone()
    }

    pub(crate) fn lookup_staged(&self, staged_name: &str) -> Option<PathBuf> {
        self.state.lock().staged.get(staged_name).map(|entry| entry.source.clone())
    }

    pub(crate) fn adopt_manifest(&self, manifest: Arc<Manifest>) {
        self.state.lock().manifests.insert(manifest.id(), manifest);
    }

    /// Ship a manifest, optionally starting a tool daemon from it.
    ///
    /// Atomic from the caller's view: concurrent sends against this
    /// session serialize, and the dedup map is only updated when the
    /// transfer succeeded end to end.
    pub(crate) fn send_manifest(
        self: &Arc<Self>,
        manifest: &Arc<Manifest>,
        exec: Option<ExecSpec>,
    ) -> Result<(), CtiError> {
        let app = self
            .app
            .upgrade()
            .ok_or_else(|| CtiError::Usage(format!("session {}'s app is gone", self.id)))?;

        let _transfer = self.transfer_lock.lock();

        // Consuming the manifest invalidates it regardless of transfer
        // outcome; a failed send never commits names.
        let mut files = manifest.seal()?;
        let manifest_id = manifest.id();

        // First transfer also carries the app control files.
        let control_files: Vec<(String, PathBuf)> = if self.state.lock().control_sent {
            Vec::new()
        } else {
            app.control_files().to_vec()
        };

        if files.is_empty() && control_files.is_empty() && exec.is_none() {
            debug!(manifest = %manifest_id, "empty manifest, nothing to ship");
            return Ok(());
        }

        // System libraries present on every node need no shipping. Only
        // dependency-walk entries are eligible; explicit adds always ship.
        let auto_candidates: BTreeSet<PathBuf> = files
            .iter()
            .filter(|file| file.auto)
            .map(|file| file.source.clone())
            .collect();
        if !auto_candidates.is_empty() {
            let present = app.job().check_files(&auto_candidates)?;
            if !present.is_empty() {
                debug!(count = present.len(), "dropping libraries preinstalled on all nodes");
                files.retain(|file| !file.auto || !present.contains(&file.source));
            }
        }

        app.ensure_daemon_shipped()?;

        let shipped_index = self.state.lock().shipped_count + 1;
        let archive_name = format!("{}.{shipped_index}.tar", self.name);
        let package = build_archive(
            self.stage_dir.path(),
            &archive_name,
            &files,
            &control_files,
        )?;

        app.job().ship_package(package.path(), package.file_name())?;

        // Unpack on every node; the lock file is the arrival marker the
        // backend waits on, so the transfer itself stays asynchronous.
        let lock_file = self.remote_root.join(format!(".{manifest_id}.lock"));
        let dlaunch_args = self.dlaunch_argv(&app, &archive_name, manifest_id, exec.as_ref());
        app.job().start_daemon(&dlaunch_args, &[], Synchrony::Async)?;

        // Transfer succeeded: commit.
        let mut state = self.state.lock();
        for file in &files {
            state
                .staged
                .entry(file.staged_name.clone())
                .or_insert_with(|| StagedEntry { source: file.source.clone() });
        }
        for (name, path) in &control_files {
            state
                .staged
                .entry(name.clone())
                .or_insert_with(|| StagedEntry { source: path.clone() });
        }
        state.control_sent = true;
        state.shipped_count = shipped_index;
        state.lock_files.push(lock_file);
        if exec.is_some() {
            state.daemon_count += 1;
        }
        info!(
            session = %self.id,
            manifest = %manifest_id,
            archive = %archive_name,
            files = files.len(),
            daemon = exec.is_some(),
            "manifest shipped"
        );
        Ok(())
    }

    /// Remote launcher invocation: unpack the archive into the sandbox and
    /// optionally exec the tool daemon inside it.
    fn dlaunch_argv(
        &self,
        app: &App,
        archive_name: &str,
        manifest_id: ManifestId,
        exec: Option<&ExecSpec>,
    ) -> Vec<String> {
        let job = app.job();
        let toolpath = job.toolpath();
        let mut argv = vec![
            toolpath.join(cti_env::DLAUNCH_BINARY).to_string_lossy().into_owned(),
            "--root".to_string(),
            self.remote_root.to_string_lossy().into_owned(),
            "--archive".to_string(),
            toolpath.join(archive_name).to_string_lossy().into_owned(),
            "--manifest".to_string(),
            manifest_id.to_string(),
            "--apid".to_string(),
            job.job_id(),
            "--wlm".to_string(),
            job.wlm_type().as_str().to_string(),
        ];
        if let Some(attribs) = job.attribs_path() {
            argv.push("--attribs".to_string());
            argv.push(attribs.to_string_lossy().into_owned());
        }
        let config = app.config();
        if config.debug {
            argv.push("--debug".to_string());
            if let Some(log_dir) = &config.log_dir {
                argv.push("--log-dir".to_string());
                argv.push(log_dir.to_string_lossy().into_owned());
            }
        }
        if let Some(wrapper) = &config.backend_wrapper {
            argv.push("--wrapper".to_string());
            argv.push(wrapper.clone());
        }
        if let Some(exec) = exec {
            for entry in &exec.env {
                argv.push("--env".to_string());
                argv.push(entry.clone());
            }
            argv.push("--exec".to_string());
            argv.push(exec.staged_name.clone());
            if !exec.args.is_empty() {
                argv.push("--".to_string());
                argv.extend(exec.args.iter().cloned());
            }
        }
        argv
    }

    /// Kill daemons, unlink the sandbox, invalidate manifests.
    pub(crate) fn destroy(self: &Arc<Self>) -> Result<(), CtiError> {
        let app = self.app.upgrade();
        let _transfer = self.transfer_lock.lock();

        let (had_remote_state, manifests): (bool, Vec<Arc<Manifest>>) = {
            let mut state = self.state.lock();
            let had = state.shipped_count > 0 || state.daemon_count > 0;
            (had, state.manifests.drain().map(|(_, m)| m).collect())
        };
        for manifest in manifests {
            manifest.invalidate();
        }

        if had_remote_state {
            if let Some(app) = app {
                let toolpath = app.job().toolpath();
                let argv = vec![
                    toolpath.join(cti_env::DLAUNCH_BINARY).to_string_lossy().into_owned(),
                    "--root".to_string(),
                    self.remote_root.to_string_lossy().into_owned(),
                    "--cleanup".to_string(),
                ];
                app.job().start_daemon(&argv, &[], Synchrony::Sync)?;
            }
        }
        info!(session = %self.id, "session destroyed");
        Ok(())
    }
}

fn build_archive(
    stage_dir: &Path,
    archive_name: &str,
    files: &[PendingFile],
    control_files: &[(String, PathBuf)],
) -> Result<cti_archive::Package, CtiError> {
    let mut builder = ArchiveBuilder::new(stage_dir, archive_name)?;
    for file in files {
        match file.kind {
            crate::manifest::FileKind::Binary => {
                builder.add_binary(&file.staged_name, &file.resolved)?
            }
            crate::manifest::FileKind::Library => {
                builder.add_library(&file.staged_name, &file.resolved)?
            }
            crate::manifest::FileKind::LibraryDir => {
                builder.add_library_dir(&file.staged_name, &file.resolved)?
            }
            crate::manifest::FileKind::File => {
                builder.add_file(&file.staged_name, &file.resolved)?
            }
        }
    }
    for (name, path) in control_files {
        builder.add_file(name, path)?;
    }
    Ok(builder.finish()?)
}
