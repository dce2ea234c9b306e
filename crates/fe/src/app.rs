// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A launched or attached parallel job and the per-App staging state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cti_core::env as cti_env;
use cti_core::{layout, AppId, Config, SessionId};
use cti_wlm::WlmJob;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CtiError;
use crate::session::Session;

pub struct App {
    id: AppId,
    job: Box<dyn WlmJob>,
    config: Config,
    /// Strong side of the App→Session arena.
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    /// Local scratch holding the staged control files.
    stage_dir: tempfile::TempDir,
    /// `(staged_name, local_path)` control files every session ships once:
    /// the node layout blob and the rank-ordered pid blob.
    control_files: Vec<(String, PathBuf)>,
    /// Tool-daemon launcher shipped to the job's toolpath.
    daemon_shipped: AtomicBool,
}

impl App {
    pub(crate) fn new(
        id: AppId,
        job: Box<dyn WlmJob>,
        config: Config,
    ) -> Result<Arc<Self>, CtiError> {
        let stage_dir = tempfile::Builder::new()
            .prefix("app.")
            .tempdir_in(&config.cfg_dir)?;

        let control_files = write_control_files(&*job, stage_dir.path());

        Ok(Arc::new(Self {
            id,
            job,
            config,
            sessions: Mutex::new(HashMap::new()),
            stage_dir,
            control_files,
            daemon_shipped: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    pub fn job(&self) -> &dyn WlmJob {
        self.job.as_ref()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// `(staged_name, local_path)` control files shipped with the first
    /// manifest of every session.
    pub fn control_files(&self) -> &[(String, PathBuf)] {
        &self.control_files
    }

    pub fn release_barrier(&self) -> Result<(), CtiError> {
        self.job.release_barrier()?;
        Ok(())
    }

    /// Ship the tool-daemon launcher once per App.
    pub(crate) fn ensure_daemon_shipped(&self) -> Result<(), CtiError> {
        if self.daemon_shipped.load(Ordering::SeqCst) {
            return Ok(());
        }
        let dlaunch = self.config.dlaunch_path()?;
        self.job.ship_package(&dlaunch, cti_env::DLAUNCH_BINARY)?;
        self.daemon_shipped.store(true, Ordering::SeqCst);
        debug!(app = %self.id, "tool-daemon launcher shipped");
        Ok(())
    }

    pub(crate) fn adopt_session(&self, session: Arc<Session>) {
        self.sessions.lock().insert(session.id(), session);
    }

    pub(crate) fn remove_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().remove(&id)
    }

    /// Destroy every session, then drop the job registration. Called from
    /// deregistration; never from plain drops.
    pub(crate) fn teardown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(err) = session.destroy() {
                warn!(app = %self.id, session = %session.id(), error = %err,
                    "session teardown failed");
            }
        }
        if let Err(err) = self.job.deregister() {
            warn!(app = %self.id, error = %err, "job deregistration failed");
        }
    }
}

/// Write the layout and pid blobs for the backend. Hostnames wider than
/// the fixed layout field make the blob unrepresentable; such systems rely
/// on the WLM's own PMI file instead.
fn write_control_files(job: &dyn WlmJob, stage_dir: &std::path::Path) -> Vec<(String, PathBuf)> {
    let placements = job.placement();
    let nodes: Vec<cti_core::NodeLayout> = placements
        .iter()
        .map(|p| cti_core::NodeLayout {
            hostname: p.hostname.clone(),
            pes_here: p.num_pes as i32,
            first_pe: p.pids.iter().map(|(rank, _)| *rank).min().unwrap_or(0) as i32,
        })
        .collect();

    let mut files = Vec::new();

    let layout_path = stage_dir.join(layout::LAYOUT_FILE_NAME);
    let layout_result = std::fs::File::create(&layout_path)
        .map_err(cti_core::LayoutError::from)
        .and_then(|mut file| layout::write_layout(&mut file, &nodes));
    match layout_result {
        Ok(()) => files.push((layout::LAYOUT_FILE_NAME.to_string(), layout_path)),
        Err(err) => warn!(error = %err, "skipping layout control file"),
    }

    let pids: Vec<i32> = job
        .proctable()
        .entries()
        .iter()
        .map(|entry| entry.pid)
        .collect();
    let pid_path = stage_dir.join(layout::PID_FILE_NAME);
    let pid_result = std::fs::File::create(&pid_path)
        .map_err(cti_core::LayoutError::from)
        .and_then(|mut file| layout::write_pids(&mut file, &pids));
    match pid_result {
        Ok(()) => files.push((layout::PID_FILE_NAME.to_string(), pid_path)),
        Err(err) => warn!(error = %err, "skipping pid control file"),
    }

    files
}
