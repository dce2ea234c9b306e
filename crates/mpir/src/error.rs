// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MpirError {
    #[error("failed to start launcher: {0}")]
    Launch(String),
    #[error("failed to attach to launcher pid {pid}: {message}")]
    Attach { pid: i32, message: String },
    #[error("launcher exited before reaching the startup barrier (status {0})")]
    ExitedEarly(i32),
    #[error("no inferior with id {0}")]
    UnknownId(u64),
    #[error("symbol {0:?} could not be read from the stopped launcher")]
    SymbolRead(String),
    #[error("proctable is malformed: {0}")]
    BadProctable(String),
    #[error("debugger protocol error: {0}")]
    Protocol(String),
    #[error("debugger reported: {0}")]
    Gdb(String),
    #[error("MPIR shim failed to report the launcher pid")]
    ShimNoPid,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
