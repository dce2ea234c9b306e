// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The inferior-control seam: launching or attaching a launcher and holding
//! it stopped at `MPIR_Breakpoint`.

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use cti_core::Proctable;

use crate::error::MpirError;

/// Lifetime of a controlled launcher.
///
/// `Starting → Stopped → (Released → Exited) | Terminated`. A
/// [`Inferior`] handle only exists in `Stopped`; the terminal transitions
/// consume it, so illegal orders are unrepresentable and a missing handle
/// surfaces as [`MpirError::UnknownId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferiorState {
    Starting,
    Stopped,
    Released,
    Exited,
    Terminated,
}

/// Where the launcher's standard streams go.
#[derive(Debug)]
pub enum StdioSpec {
    /// Inherit whatever the controlling process has.
    Inherit,
    /// Explicit `[stdin, stdout, stderr]`, typically received over the
    /// helper socket.
    Fds([OwnedFd; 3]),
}

/// A launcher start request.
#[derive(Debug)]
pub struct LaunchSpec {
    /// Resolved launcher binary.
    pub path: PathBuf,
    /// Full argv including argv[0].
    pub argv: Vec<String>,
    /// Environment deltas: `Some` sets, `None` clears.
    pub env: Vec<(String, Option<String>)>,
    pub stdio: StdioSpec,
}

/// A launcher held at the MPIR startup barrier.
pub trait Inferior: Send {
    fn pid(&self) -> i32;

    /// Read a NUL-terminated string variable from the stopped image.
    fn read_string(&mut self, symbol: &str) -> Result<String, MpirError>;

    /// Read `MPIR_proctable` / `MPIR_proctable_size`.
    fn read_proctable(&mut self) -> Result<Proctable, MpirError>;

    /// Detach and let the launcher continue.
    fn release(self: Box<Self>) -> Result<(), MpirError>;

    /// Release, then block until the launcher exits. Returns the exit code.
    fn wait(self: Box<Self>) -> Result<i32, MpirError>;

    /// Detach and bring the launcher down.
    fn terminate(self: Box<Self>) -> Result<(), MpirError>;
}

/// Factory for stopped inferiors. Implementations own the breakpoint
/// mechanics; everything above treats them as opaque.
pub trait InferiorControl: Send + Sync {
    fn launch_stopped(&self, spec: LaunchSpec) -> Result<Box<dyn Inferior>, MpirError>;

    fn attach_stopped(&self, launcher: &Path, pid: i32) -> Result<Box<dyn Inferior>, MpirError>;
}
