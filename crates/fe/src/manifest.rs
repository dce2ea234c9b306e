// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A pending file-set delta to a Session.

use std::path::{Path, PathBuf};
use std::sync::Weak;

use cti_core::paths;
use cti_core::ManifestId;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::deps::DependencyOracle;
use crate::error::{CtiError, StagingError};
use crate::session::Session;

/// Whether `add_binary`/`add_library` pull in ELF dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsPolicy {
    Stage,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    Binary,
    Library,
    LibraryDir,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Building,
    Shipped,
    Invalidated,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingFile {
    pub staged_name: String,
    /// Canonical source path; the dedup identity.
    pub source: PathBuf,
    /// As-resolved path, kept for archiving under the requested name.
    pub resolved: PathBuf,
    pub kind: FileKind,
    /// Added by the dependency walk rather than the tool.
    pub auto: bool,
}

struct ManifestState {
    disposition: Disposition,
    files: IndexMap<String, PendingFile>,
}

pub struct Manifest {
    id: ManifestId,
    session: Weak<Session>,
    state: Mutex<ManifestState>,
}

enum AddOutcome {
    /// New to both manifest and session; dependency walk may continue.
    Added(PathBuf),
    /// Already staged or pending with the same source.
    AlreadyStaged,
}

impl Manifest {
    pub(crate) fn new(id: ManifestId, session: Weak<Session>) -> Self {
        Self {
            id,
            session,
            state: Mutex::new(ManifestState {
                disposition: Disposition::Building,
                files: IndexMap::new(),
            }),
        }
    }

    pub fn id(&self) -> ManifestId {
        self.id
    }

    pub(crate) fn session(&self) -> Option<std::sync::Arc<Session>> {
        self.session.upgrade()
    }

    pub fn is_building(&self) -> bool {
        self.state.lock().disposition == Disposition::Building
    }

    pub fn add_binary(
        &self,
        path: &str,
        oracle: &dyn DependencyOracle,
        policy: DepsPolicy,
    ) -> Result<(), CtiError> {
        let outcome = self.add_one(FileKind::Binary, path, false)?;
        if policy == DepsPolicy::Stage {
            if let AddOutcome::Added(resolved) = outcome {
                self.walk_dependencies(&resolved, oracle)?;
            }
        }
        Ok(())
    }

    pub fn add_library(
        &self,
        path: &str,
        oracle: &dyn DependencyOracle,
        policy: DepsPolicy,
    ) -> Result<(), CtiError> {
        let outcome = self.add_one(FileKind::Library, path, false)?;
        if policy == DepsPolicy::Stage {
            if let AddOutcome::Added(resolved) = outcome {
                self.walk_dependencies(&resolved, oracle)?;
            }
        }
        Ok(())
    }

    pub fn add_library_dir(&self, path: &str) -> Result<(), CtiError> {
        self.add_one(FileKind::LibraryDir, path, false).map(|_| ())
    }

    pub fn add_file(&self, path: &str) -> Result<(), CtiError> {
        self.add_one(FileKind::File, path, false).map(|_| ())
    }

    /// Recursively add every shared-object dependency, memoised through
    /// the session dedup map, so chains and cycles terminate.
    fn walk_dependencies(
        &self,
        binary: &Path,
        oracle: &dyn DependencyOracle,
    ) -> Result<(), CtiError> {
        let mut queue = oracle.dependencies(binary)?;
        while let Some(dep) = queue.pop() {
            let dep_str = dep.to_string_lossy().into_owned();
            if let AddOutcome::Added(resolved) = self.add_one(FileKind::Library, &dep_str, true)? {
                queue.extend(oracle.dependencies(&resolved)?);
            }
        }
        Ok(())
    }

    fn add_one(&self, kind: FileKind, path: &str, auto: bool) -> Result<AddOutcome, CtiError> {
        if !self.is_building() {
            return Err(CtiError::Usage(format!(
                "manifest {} has already been shipped",
                self.id
            )));
        }
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| CtiError::Usage(format!("manifest {}'s session is gone", self.id)))?;

        let resolved = resolve_source(kind, path)?;
        let canonical = std::fs::canonicalize(&resolved).map_err(|source| {
            StagingError::Resolve { path: resolved.clone(), source }
        })?;
        let staged_name = paths::base_name(&resolved).ok_or_else(|| {
            CtiError::Usage(format!("{path:?} has no usable file name"))
        })?;

        // Session-level dedup: the committed map of everything shipped.
        if let Some(existing) = session.lookup_staged(&staged_name) {
            if existing == canonical {
                debug!(name = %staged_name, "already shipped in session");
                return Ok(AddOutcome::AlreadyStaged);
            }
            return Err(StagingError::NameCollision {
                staged_name,
                existing,
                offered: canonical,
            }
            .into());
        }

        // Manifest-level: pending adds in this delta.
        let mut state = self.state.lock();
        if let Some(pending) = state.files.get(&staged_name) {
            if pending.source == canonical {
                return Ok(AddOutcome::AlreadyStaged);
            }
            return Err(StagingError::NameCollision {
                staged_name,
                existing: pending.source.clone(),
                offered: canonical,
            }
            .into());
        }

        debug!(name = %staged_name, source = %canonical.display(), ?kind, "queued for staging");
        state.files.insert(
            staged_name.clone(),
            PendingFile { staged_name, source: canonical, resolved: resolved.clone(), kind, auto },
        );
        Ok(AddOutcome::Added(resolved))
    }

    /// Consume the pending set, moving to the shipped state. One-shot.
    pub(crate) fn seal(&self) -> Result<Vec<PendingFile>, CtiError> {
        let mut state = self.state.lock();
        if state.disposition != Disposition::Building {
            return Err(CtiError::Usage(format!(
                "manifest {} has already been shipped",
                self.id
            )));
        }
        state.disposition = Disposition::Shipped;
        Ok(std::mem::take(&mut state.files).into_values().collect())
    }

    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock();
        state.disposition = Disposition::Invalidated;
        state.files.clear();
    }

    /// Number of files queued so far.
    pub fn len(&self) -> usize {
        self.state.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().files.is_empty()
    }
}

fn resolve_source(kind: FileKind, path: &str) -> Result<PathBuf, CtiError> {
    let found = match kind {
        FileKind::Binary => paths::find_executable(path),
        FileKind::Library => paths::find_library(path),
        FileKind::File => paths::find_file(path),
        FileKind::LibraryDir => {
            let dir = PathBuf::from(path);
            return if dir.is_dir() {
                Ok(dir)
            } else {
                Err(StagingError::NotFound { path: path.to_string(), search: "PATH" }.into())
            };
        }
    };
    found.ok_or_else(|| {
        let search = match kind {
            FileKind::Library => "LD_LIBRARY_PATH",
            _ => "PATH",
        };
        StagingError::NotFound { path: path.to_string(), search }.into()
    })
}

