// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("helper protocol error: {0}")]
    Protocol(#[from] cti_wire::ProtocolError),
    #[error("bad handshake from helper: {0}")]
    Handshake(String),
    #[error("helper rejected request: {0}")]
    Rejected(String),
    #[error("duplicate app pid {0}")]
    DuplicatePid(i32),
    #[error("invalid app id {0}")]
    InvalidId(u64),
    #[error("invalid utility pid {0}")]
    InvalidUtilPid(i32),
    #[error("binary {0:?} not found in PATH")]
    BinaryNotFound(String),
    #[error("malformed environment entry {0:?}")]
    BadEnvEntry(String),
    #[error("mpir: {0}")]
    Mpir(#[from] cti_mpir::MpirError),
    #[error("failed to spawn helper {path:?}: {source}")]
    Spawn {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
}
