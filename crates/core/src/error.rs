// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Surface error identity shared across the workspace.
//!
//! Individual crates carry their own `thiserror` enums; the frontend folds
//! them into one of these kinds when a failure crosses the public API.

/// Classification of a failure as observed by a tool using the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid handle, modify-after-ship, double release, wrong WLM.
    Usage,
    /// A WLM primitive failed; the message carries the tool's stderr.
    Wlm,
    /// Name collision, invalid file type, missing file, path not found.
    Staging,
    /// MPIR attach/read/release failure.
    Inferior,
    /// Supervisor helper pipe closed, bad handshake, unknown tag.
    Helper,
    /// Unreadable config dir, bad permissions, missing install dir.
    Env,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Usage => "usage",
            ErrorKind::Wlm => "wlm",
            ErrorKind::Staging => "staging",
            ErrorKind::Inferior => "inferior",
            ErrorKind::Helper => "helper",
            ErrorKind::Env => "environment",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
