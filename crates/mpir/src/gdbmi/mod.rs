// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Production inferior control driving `gdb --interpreter=mi2`.
//!
//! The launcher runs as gdb's child with a pending breakpoint on
//! `MPIR_Breakpoint`; `MPIR_being_debugged` is set at the first stop so the
//! launcher publishes its proctable. The gdb binary is `gdb` on `PATH`
//! unless `CTI_GDB_PATH` points elsewhere.

mod mi;

use std::io::{BufRead, BufReader, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::control::{Inferior, InferiorControl, LaunchSpec, StdioSpec};
use crate::error::MpirError;
use mi::{cstring_from_value, field, int_from_value, parse_record, MiRecord, MiTuple};

pub struct GdbMiControl {
    gdb_path: PathBuf,
}

impl GdbMiControl {
    pub fn new(gdb_path: PathBuf) -> Self {
        Self { gdb_path }
    }

    pub fn from_env() -> Self {
        let gdb_path = std::env::var_os(cti_core::env::GDB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("gdb"));
        Self { gdb_path }
    }

    fn spawn_session(&self, configure: impl FnOnce(&mut Command)) -> Result<GdbSession, MpirError> {
        let mut cmd = Command::new(&self.gdb_path);
        cmd.args(["--interpreter=mi2", "--quiet", "--nx"]);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());
        configure(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|err| MpirError::Launch(format!("failed to start {:?}: {err}", self.gdb_path)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MpirError::Protocol("gdb stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MpirError::Protocol("gdb stdout unavailable".to_string()))?;

        let mut session =
            GdbSession { child, stdin, reader: BufReader::new(stdout) };
        session.drain_to_prompt()?;
        session.command("-gdb-set confirm off")?;
        Ok(session)
    }
}

impl InferiorControl for GdbMiControl {
    fn launch_stopped(&self, spec: LaunchSpec) -> Result<Box<dyn Inferior>, MpirError> {
        let mut session = self.spawn_session(|cmd| {
            cmd.arg(&spec.path);
            for (name, value) in &spec.env {
                match value {
                    Some(value) => {
                        cmd.env(name, value);
                    }
                    None => {
                        cmd.env_remove(name);
                    }
                }
            }
        })?;

        // Inferior argv plus stdio routing, applied by gdb's startup shell.
        let mut args_line = spec
            .argv
            .iter()
            .skip(1)
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        if let StdioSpec::Fds(fds) = &spec.stdio {
            // The fds are inherited by gdb and its shell; /dev/fd re-opens
            // them for the inferior.
            args_line.push_str(&format!(
                " < /dev/fd/{} > /dev/fd/{} 2> /dev/fd/{}",
                fds[0].as_raw_fd(),
                fds[1].as_raw_fd(),
                fds[2].as_raw_fd()
            ));
        }
        if !args_line.trim().is_empty() {
            session.command(&format!("-gdb-set args {args_line}"))?;
        }

        // Stop at the first instruction so MPIR_being_debugged is visible
        // before the launcher decides whether to publish its proctable.
        session.console("starti")?;
        session.wait_stopped()?;

        if let Err(err) = session.command("-gdb-set var MPIR_being_debugged=1") {
            warn!(error = %err, "launcher does not expose MPIR_being_debugged");
        }
        session.command("-break-insert -f MPIR_Breakpoint")?;
        session.command_running("-exec-continue")?;
        session.wait_breakpoint()?;

        let launcher_pid = session.query_pid()?;
        debug!(launcher_pid, "launcher stopped at MPIR_Breakpoint");
        Ok(Box::new(GdbInferior { session, launcher_pid, stdio: spec.stdio }))
    }

    fn attach_stopped(&self, launcher: &Path, pid: i32) -> Result<Box<dyn Inferior>, MpirError> {
        let mut session = self
            .spawn_session(|cmd| {
                cmd.arg(launcher);
                cmd.arg("-p").arg(pid.to_string());
            })
            .map_err(|err| MpirError::Attach { pid, message: err.to_string() })?;

        if let Err(err) = session.command("-gdb-set var MPIR_being_debugged=1") {
            warn!(error = %err, "launcher does not expose MPIR_being_debugged");
        }
        session.command("-break-insert -f MPIR_Breakpoint")?;
        session.command_running("-exec-continue")?;
        session.wait_breakpoint().map_err(|err| MpirError::Attach { pid, message: err.to_string() })?;

        Ok(Box::new(GdbInferior { session, launcher_pid: pid, stdio: StdioSpec::Inherit }))
    }
}

/// One gdb process speaking MI over its stdio.
struct GdbSession {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl GdbSession {
    fn send(&mut self, command: &str) -> Result<(), MpirError> {
        writeln!(self.stdin, "{command}")?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Consume startup banner output up to the first ready prompt.
    fn drain_to_prompt(&mut self) -> Result<(), MpirError> {
        loop {
            if let MiRecord::Prompt = self.read_record()? {
                return Ok(());
            }
        }
    }

    fn read_record(&mut self) -> Result<MiRecord, MpirError> {
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                return Err(MpirError::Protocol("gdb exited unexpectedly".to_string()));
            }
            if line.trim().is_empty() {
                continue;
            }
            return parse_record(&line);
        }
    }

    /// Run a command expecting `^done`; returns its fields.
    fn command(&mut self, command: &str) -> Result<MiTuple, MpirError> {
        self.send(command)?;
        loop {
            match self.read_record()? {
                MiRecord::Result { class, fields } => match class.as_str() {
                    "done" | "exit" => return Ok(fields),
                    "error" => {
                        let msg = field(&fields, "msg")
                            .and_then(|v| v.as_const())
                            .unwrap_or("unknown gdb error");
                        return Err(MpirError::Gdb(msg.to_string()));
                    }
                    other => {
                        return Err(MpirError::Protocol(format!(
                            "unexpected result class {other:?} for {command:?}"
                        )))
                    }
                },
                // Console chatter and async notifications are irrelevant
                // between command and result.
                MiRecord::Stream(_) | MiRecord::Async { .. } | MiRecord::Prompt => continue,
            }
        }
    }

    /// Run a command expecting `^running`.
    fn command_running(&mut self, command: &str) -> Result<(), MpirError> {
        self.send(command)?;
        loop {
            match self.read_record()? {
                MiRecord::Result { class, fields } => match class.as_str() {
                    "running" => return Ok(()),
                    "error" => {
                        let msg = field(&fields, "msg")
                            .and_then(|v| v.as_const())
                            .unwrap_or("unknown gdb error");
                        return Err(MpirError::Gdb(msg.to_string()));
                    }
                    other => {
                        return Err(MpirError::Protocol(format!(
                            "unexpected result class {other:?} for {command:?}"
                        )))
                    }
                },
                MiRecord::Stream(_) | MiRecord::Async { .. } | MiRecord::Prompt => continue,
            }
        }
    }

    fn console(&mut self, command: &str) -> Result<(), MpirError> {
        self.send(&format!("-interpreter-exec console \"{command}\""))?;
        loop {
            match self.read_record()? {
                MiRecord::Result { class, fields } => match class.as_str() {
                    "done" | "running" => return Ok(()),
                    "error" => {
                        let msg = field(&fields, "msg")
                            .and_then(|v| v.as_const())
                            .unwrap_or("unknown gdb error");
                        return Err(MpirError::Gdb(msg.to_string()));
                    }
                    other => {
                        return Err(MpirError::Protocol(format!(
                            "unexpected result class {other:?} for console {command:?}"
                        )))
                    }
                },
                MiRecord::Stream(_) | MiRecord::Async { .. } | MiRecord::Prompt => continue,
            }
        }
    }

    /// Block until the next `*stopped` record.
    fn wait_stopped(&mut self) -> Result<MiTuple, MpirError> {
        loop {
            if let MiRecord::Async { class, fields } = self.read_record()? {
                if class == "stopped" {
                    return Ok(fields);
                }
            }
        }
    }

    /// Block until the launcher hits the startup barrier breakpoint.
    fn wait_breakpoint(&mut self) -> Result<(), MpirError> {
        loop {
            let fields = self.wait_stopped()?;
            let reason = field(&fields, "reason").and_then(|v| v.as_const()).unwrap_or("");
            match reason {
                "breakpoint-hit" => return Ok(()),
                "exited-normally" => return Err(MpirError::ExitedEarly(0)),
                "exited" => {
                    let code = field(&fields, "exit-code")
                        .and_then(|v| v.as_const())
                        .and_then(|c| int_from_value(c).ok())
                        .unwrap_or(1);
                    return Err(MpirError::ExitedEarly(code as i32));
                }
                "signal-received" | "end-stepping-range" | "" => continue,
                other => {
                    return Err(MpirError::Protocol(format!(
                        "unexpected stop reason {other:?} before MPIR_Breakpoint"
                    )))
                }
            }
        }
    }

    fn evaluate(&mut self, expression: &str) -> Result<String, MpirError> {
        let fields = self.command(&format!(
            "-data-evaluate-expression \"{}\"",
            expression.replace('"', "\\\"")
        ))?;
        field(&fields, "value")
            .and_then(|v| v.as_const())
            .map(str::to_string)
            .ok_or_else(|| MpirError::Protocol(format!("no value for {expression:?}")))
    }

    fn evaluate_int(&mut self, expression: &str) -> Result<i64, MpirError> {
        let value = self.evaluate(expression)?;
        int_from_value(&value)
    }

    fn evaluate_cstring(&mut self, expression: &str) -> Result<String, MpirError> {
        let value = self.evaluate(expression)?;
        cstring_from_value(&value)
    }

    fn query_pid(&mut self) -> Result<i32, MpirError> {
        let fields = self.command("-list-thread-groups")?;
        let pid = field(&fields, "groups")
            .and_then(|v| v.as_list())
            .and_then(|groups| groups.first())
            .and_then(|group| group.as_tuple())
            .and_then(|group| field(group, "pid"))
            .and_then(|v| v.as_const())
            .and_then(|pid| pid.parse().ok());
        pid.ok_or_else(|| MpirError::Protocol("no inferior pid in -list-thread-groups".to_string()))
    }

    fn shutdown(mut self) {
        let _ = self.send("-gdb-exit");
        let _ = self.child.wait();
    }
}

struct GdbInferior {
    session: GdbSession,
    launcher_pid: i32,
    // Held so the /dev/fd redirections stay alive as long as the launcher.
    #[allow(dead_code)]
    stdio: StdioSpec,
}

impl Inferior for GdbInferior {
    fn pid(&self) -> i32 {
        self.launcher_pid
    }

    fn read_string(&mut self, symbol: &str) -> Result<String, MpirError> {
        self.session
            .evaluate_cstring(&format!("(char *){symbol}"))
            .map_err(|_| MpirError::SymbolRead(symbol.to_string()))
    }

    fn read_proctable(&mut self) -> Result<cti_core::Proctable, MpirError> {
        let size = self.session.evaluate_int("MPIR_proctable_size")?;
        if size <= 0 {
            return Err(MpirError::BadProctable(format!("MPIR_proctable_size = {size}")));
        }

        let mut entries = Vec::with_capacity(size as usize);
        for rank in 0..size {
            let hostname = self
                .session
                .evaluate_cstring(&format!("(char *)MPIR_proctable[{rank}].host_name"))?;
            let executable = self
                .session
                .evaluate_cstring(&format!("(char *)MPIR_proctable[{rank}].executable_name"))?;
            let pid = self.session.evaluate_int(&format!("MPIR_proctable[{rank}].pid"))?;
            entries.push(cti_core::ProctableEntry {
                rank: rank as usize,
                hostname,
                pid: pid as i32,
                executable,
            });
        }

        cti_core::Proctable::new(entries).map_err(|err| MpirError::BadProctable(err.to_string()))
    }

    fn release(mut self: Box<Self>) -> Result<(), MpirError> {
        self.session.command("-target-detach")?;
        self.session.shutdown();
        Ok(())
    }

    fn wait(mut self: Box<Self>) -> Result<i32, MpirError> {
        self.session.command_running("-exec-continue")?;
        let code = loop {
            let fields = self.session.wait_stopped()?;
            match field(&fields, "reason").and_then(|v| v.as_const()).unwrap_or("") {
                "exited-normally" => break 0,
                "exited" => {
                    break field(&fields, "exit-code")
                        .and_then(|v| v.as_const())
                        .and_then(|c| int_from_value(c).ok())
                        .unwrap_or(1) as i32
                }
                "exited-signalled" => break 1,
                _ => continue,
            }
        };
        self.session.shutdown();
        Ok(code)
    }

    fn terminate(mut self: Box<Self>) -> Result<(), MpirError> {
        let pid = Pid::from_raw(self.launcher_pid);
        let _ = kill(pid, Signal::SIGTERM);
        let _ = self.session.command("-target-detach");
        self.session.shutdown();
        // The launcher had its chance to exit cleanly.
        let _ = kill(pid, Signal::SIGKILL);
        Ok(())
    }
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
#[path = "gdbmi_tests.rs"]
mod tests;
