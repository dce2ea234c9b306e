// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ctishim`: MPIR shim for wrapped launchers.
//!
//! Installed under the real launcher's name in a temporary PATH directory.
//! When a wrapper script execs "the launcher" and the sentinel token is the
//! last argument, the shim reports its own pid to the supervisor, stops
//! itself so the supervisor can attach, and then execs the real launcher in
//! place. Without the token (the wrapper probing the launcher for other
//! reasons) it execs the real launcher transparently.

use std::io::Write;
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{bail, Context, Result};
use cti_mpir::shim::{
    SHIM_LAUNCHER_PATH_ENV, SHIM_ORIGINAL_PATH_ENV, SHIM_OUTPUT_FD_ENV, SHIM_STDERR_FD_ENV,
    SHIM_STDIN_FD_ENV, SHIM_STDOUT_FD_ENV, SHIM_TOKEN_ENV,
};
use cti_wire::file_from_inherited_fd;
use nix::sys::signal::{raise, Signal};
use nix::unistd::dup2;

fn main() -> Result<()> {
    let launcher = std::env::var(SHIM_LAUNCHER_PATH_ENV)
        .context("shim invoked without CTI_MPIR_LAUNCHER_PATH")?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let token = std::env::var(SHIM_TOKEN_ENV).ok();

    let is_target = matches!((&token, args.last()), (Some(token), Some(last)) if token == last);
    if !is_target {
        // Not our launch: behave exactly like the real launcher.
        return Err(exec_launcher(&launcher, &args).into());
    }

    // Report our pid, then hold for the supervisor to attach.
    let out_fd: i32 = std::env::var(SHIM_OUTPUT_FD_ENV)
        .context("shim invoked without CTI_MPIR_SHIM_OUTPUT_FD")?
        .parse()
        .context("shim output fd is not a number")?;
    let mut pipe = file_from_inherited_fd(out_fd);
    let pid = std::process::id() as i32;
    pipe.write_all(&pid.to_ne_bytes()).context("failed to report pid")?;
    pipe.flush().ok();
    drop(pipe);

    raise(Signal::SIGSTOP).context("failed to stop for attach")?;

    // Attached and continued: become the real launcher.
    restore_stdio()?;
    let args_without_token = &args[..args.len() - 1];
    Err(exec_launcher(&launcher, args_without_token).into())
}

fn restore_stdio() -> Result<()> {
    for (env_name, target) in [
        (SHIM_STDIN_FD_ENV, 0),
        (SHIM_STDOUT_FD_ENV, 1),
        (SHIM_STDERR_FD_ENV, 2),
    ] {
        let Ok(value) = std::env::var(env_name) else {
            continue;
        };
        let fd: i32 = value.parse().with_context(|| format!("{env_name} is not a number"))?;
        if fd != target {
            dup2(fd, target).with_context(|| format!("dup2 {fd} -> {target}"))?;
        }
    }
    Ok(())
}

fn exec_launcher(launcher: &str, args: &[String]) -> std::io::Error {
    let mut cmd = Command::new(launcher);
    cmd.args(args);
    if let Ok(original_path) = std::env::var(SHIM_ORIGINAL_PATH_ENV) {
        cmd.env("PATH", original_path);
    }
    for var in [
        SHIM_OUTPUT_FD_ENV,
        SHIM_LAUNCHER_PATH_ENV,
        SHIM_ORIGINAL_PATH_ENV,
        SHIM_STDIN_FD_ENV,
        SHIM_STDOUT_FD_ENV,
        SHIM_STDERR_FD_ENV,
        SHIM_TOKEN_ENV,
    ] {
        cmd.env_remove(var);
    }
    // Only returns on failure.
    cmd.exec()
}
