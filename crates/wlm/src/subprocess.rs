// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capture-output execution of WLM command-line tools.

use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::WlmError;

#[derive(Debug)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run to completion, capturing both streams.
pub fn run_capture(program: &str, args: &[String]) -> Result<ExecOutput, WlmError> {
    run_capture_env(program, args, &[])
}

pub fn run_capture_env(
    program: &str,
    args: &[String],
    env: &[(String, String)],
) -> Result<ExecOutput, WlmError> {
    debug!(program, ?args, "exec");
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    for (name, value) in env {
        cmd.env(name, value);
    }

    let output = cmd
        .output()
        .map_err(|source| WlmError::Spawn { command: program.to_string(), source })?;

    let result = ExecOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    if !result.success() {
        debug!(program, status = result.status, stderr = %result.stderr.trim(), "tool failed");
    }
    Ok(result)
}

/// Run and require exit 0; failure carries the tool's stderr verbatim.
pub fn run_success(program: &str, args: &[String]) -> Result<ExecOutput, WlmError> {
    let output = run_capture(program, args)?;
    if output.success() {
        Ok(output)
    } else {
        Err(WlmError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
