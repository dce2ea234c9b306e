// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The error surface crossing the public API.

use std::path::PathBuf;

use cti_core::{EnvError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagingError {
    /// Wording is load-bearing: tools grep for it.
    #[error("{path}: Could not locate in {search}.")]
    NotFound { path: String, search: &'static str },
    #[error(
        "naming collision: {staged_name:?} is already staged from {existing:?}, \
         refusing {offered:?}"
    )]
    NameCollision { staged_name: String, existing: PathBuf, offered: PathBuf },
    #[error("manifest {0} has already been shipped")]
    ManifestSealed(cti_core::ManifestId),
    #[error("failed to resolve {path:?}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dependency walk failed for {binary:?}: {detail}")]
    Dependencies { binary: PathBuf, detail: String },
    #[error(transparent)]
    Archive(#[from] cti_archive::ArchiveError),
}

#[derive(Debug, Error)]
pub enum CtiError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Wlm(#[from] cti_wlm::WlmError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("inferior control: {0}")]
    Inferior(String),
    #[error(transparent)]
    Helper(#[from] cti_helper::HelperError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CtiError {
    pub fn invalid_handle(kind: &str, id: u64) -> Self {
        CtiError::Usage(format!("{kind} id {id} is not valid"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CtiError::Usage(_) => ErrorKind::Usage,
            CtiError::Wlm(cti_wlm::WlmError::BarrierReleased) => ErrorKind::Usage,
            CtiError::Wlm(_) => ErrorKind::Wlm,
            CtiError::Staging(_) => ErrorKind::Staging,
            CtiError::Inferior(_) => ErrorKind::Inferior,
            CtiError::Helper(_) => ErrorKind::Helper,
            CtiError::Env(_) => ErrorKind::Env,
            CtiError::Io(_) => ErrorKind::Env,
        }
    }
}

impl From<cti_archive::ArchiveError> for CtiError {
    fn from(err: cti_archive::ArchiveError) -> Self {
        CtiError::Staging(StagingError::Archive(err))
    }
}
