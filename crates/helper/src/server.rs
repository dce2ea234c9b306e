// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The helper's request loop.
//!
//! Single-threaded: one request, one response, in order. The only other
//! threads are the signal thread (SIGCHLD reaping, disconnect on
//! SIGTERM/SIGHUP) and short-lived termination workers.

use std::collections::HashMap;
use std::net::Shutdown;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::sync::Arc;

use cti_mpir::{InferiorControl, LaunchSpec, MpirResult, MpirSupervisor, StdioSpec};
use cti_wire::{self as wire, LaunchData, ProtocolError, ReqType, Response, RunMode};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use parking_lot::Mutex;
use signal_hook::consts::signal::{SIGCHLD, SIGHUP, SIGPIPE, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, error, info, warn};

use crate::error::HelperError;
use crate::spawn::fork_exec;
use crate::state::HelperState;

type SyncWaiters = Arc<Mutex<HashMap<i32, mpsc::Sender<i32>>>>;

pub struct Server<C: InferiorControl> {
    req: UnixStream,
    resp: UnixStream,
    state: Arc<Mutex<HelperState>>,
    supervisor: Arc<MpirSupervisor<C>>,
    sync_waiters: SyncWaiters,
}

impl<C: InferiorControl + 'static> Server<C> {
    pub fn new(req: UnixStream, resp: UnixStream, control: C) -> Self {
        Self {
            req,
            resp,
            state: Arc::new(Mutex::new(HelperState::new())),
            supervisor: Arc::new(MpirSupervisor::new(control)),
            sync_waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run to completion: until Shutdown, parent disconnect, or a fatal
    /// stream error. All owned processes are gone when this returns.
    pub fn run(mut self) -> Result<(), HelperError> {
        let result = self.serve();
        self.cleanup();
        result
    }

    fn serve(&mut self) -> Result<(), HelperError> {
        self.spawn_signal_thread()?;

        // Handshake: the parent learns our pid from the first response.
        self.write_response(&Response::Id { id: std::process::id() as u64 })?;

        loop {
            let tag = {
                let mut req = &self.req;
                match wire::read_u8(&mut req) {
                    Ok(byte) => wire::ReqType::from_byte(byte),
                    Err(ProtocolError::Disconnected) => {
                        info!("parent disconnected, cleaning up");
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            };

            let tag = match tag {
                Ok(tag) => tag,
                Err(err) => {
                    error!(error = %err, "unreadable request tag");
                    return Err(err.into());
                }
            };

            debug!(request = tag.name(), "dispatch");
            match tag {
                ReqType::Shutdown => {
                    self.write_response(&Response::Ok { success: true })?;
                    info!("shutdown requested");
                    break;
                }
                other => {
                    if let Err(err) = self.dispatch(other) {
                        // Stream-level failures are fatal; handler errors
                        // were already answered with a failure response.
                        error!(request = other.name(), error = %err, "request failed fatally");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, tag: ReqType) -> Result<(), HelperError> {
        match tag {
            ReqType::ForkExecvpApp => self.handle_fork_execvp_app(),
            ReqType::ForkExecvpUtil => self.handle_fork_execvp_util(),
            ReqType::LaunchMpir => self.handle_launch_mpir(),
            ReqType::LaunchMpirShim => self.handle_launch_mpir_shim(),
            ReqType::AttachMpir => self.handle_attach_mpir(),
            ReqType::ReadStringMpir => self.handle_read_string_mpir(),
            ReqType::ReleaseMpir => self.handle_release_mpir(),
            ReqType::WaitMpir => self.handle_wait_mpir(),
            ReqType::TerminateMpir => self.handle_terminate_mpir(),
            ReqType::RegisterApp => self.handle_register_app(),
            ReqType::RegisterUtil => self.handle_register_util(),
            ReqType::DeregisterApp => self.handle_deregister_app(),
            ReqType::ReleaseApp => self.handle_release_app(),
            ReqType::CheckApp => self.handle_check_app(),
            ReqType::Shutdown => Ok(()),
        }
    }

    fn handle_fork_execvp_app(&mut self) -> Result<(), HelperError> {
        let stdio = wire::recv_stdio_fds(&self.req)?;
        let launch = {
            let mut req = &self.req;
            wire::read_launch_data(&mut req)?
        };

        let registered = fork_exec(&launch, stdio).and_then(|pid| {
            let id = self.state.lock().register_launched_app(pid)?;
            Ok((id, pid))
        });
        // The app response carries both the id and the launcher pid; the
        // MPIR shape fits with an empty proctable.
        match registered {
            Ok((id, pid)) => self.write_response(&Response::Mpir(Ok(cti_wire::MpirData {
                id,
                launcher_pid: pid,
                job_id: 0,
                step_id: 0,
                proctable: Vec::new(),
            }))),
            Err(err) => {
                warn!(error = %err, "ForkExecvpApp failed");
                self.write_response(&Response::Mpir(Err(err.to_string())))
            }
        }
    }

    fn handle_fork_execvp_util(&mut self) -> Result<(), HelperError> {
        let (app_id, mode) = {
            let mut req = &self.req;
            (wire::read_u64(&mut req)?, wire::read_run_mode(&mut req)?)
        };
        let stdio = wire::recv_stdio_fds(&self.req)?;
        let launch = {
            let mut req = &self.req;
            wire::read_launch_data(&mut req)?
        };

        let outcome = self.run_util(app_id, mode, &launch, stdio);
        match outcome {
            Ok(success) => self.write_response(&Response::Ok { success }),
            Err(err) => {
                warn!(app_id, error = %err, "ForkExecvpUtil failed");
                self.write_response(&Response::Ok { success: false })
            }
        }
    }

    fn run_util(
        &self,
        app_id: u64,
        mode: RunMode,
        launch: &LaunchData,
        stdio: [OwnedFd; 3],
    ) -> Result<bool, HelperError> {
        match mode {
            RunMode::Asynchronous => {
                let pid = fork_exec(launch, stdio)?;
                self.state.lock().register_util(app_id, pid)?;
                Ok(true)
            }
            RunMode::Synchronous => {
                let (tx, rx) = mpsc::channel();
                let pid = {
                    // Holding the waiter lock across the spawn closes the
                    // window where the reaper could see the exit first.
                    let mut waiters = self.sync_waiters.lock();
                    let pid = fork_exec(launch, stdio)?;
                    waiters.insert(pid, tx);
                    pid
                };
                self.state.lock().register_util(app_id, pid)?;

                let code = rx.recv().map_err(|_| {
                    HelperError::Rejected("reaper dropped sync wait channel".to_string())
                })?;
                debug!(app_id, pid, code, "synchronous utility finished");
                Ok(code == 0)
            }
        }
    }

    fn handle_launch_mpir(&mut self) -> Result<(), HelperError> {
        let stdio = wire::recv_stdio_fds(&self.req)?;
        let launch = {
            let mut req = &self.req;
            wire::read_launch_data(&mut req)?
        };

        let result = self.launch_mpir(&launch, StdioSpec::Fds(stdio));
        self.write_mpir_response(result)
    }

    fn launch_mpir(
        &self,
        launch: &LaunchData,
        stdio: StdioSpec,
    ) -> Result<MpirResult, HelperError> {
        let path = cti_core::paths::find_executable(&launch.file)
            .ok_or_else(|| HelperError::BinaryNotFound(launch.file.clone()))?;

        let mut env: Vec<(String, Option<String>)> = Vec::new();
        for entry in &launch.env {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| HelperError::BadEnvEntry(entry.clone()))?;
            env.push((name.to_string(), Some(value.to_string())));
        }
        for name in &launch.env_blacklist {
            env.push((name.clone(), None));
        }

        let id = self.state.lock().allocate_id();
        let spec = LaunchSpec { path, argv: launch.argv.clone(), env, stdio };
        let result = self.supervisor.launch(id, spec).map_err(|err| {
            HelperError::Rejected(format!(
                "Failed to start launcher with the provided arguments: {} \
                 Ensure that the launcher binary exists and that all arguments \
                 required by your system are provided ({err})",
                launch.argv.join(" ")
            ))
        })?;

        // Launched inferiors are torn down if the tool goes away.
        self.state.lock().bind_launched_pid(id, result.launcher_pid)?;
        Ok(result)
    }

    fn handle_launch_mpir_shim(&mut self) -> Result<(), HelperError> {
        let shim = {
            let mut req = &self.req;
            wire::read_shim_data(&mut req)?
        };
        let stdio = wire::recv_stdio_fds(&self.req)?;
        let launch = {
            let mut req = &self.req;
            wire::read_launch_data(&mut req)?
        };

        let result = self.launch_mpir_shim(&shim, &launch, stdio);
        self.write_mpir_response(result)
    }

    fn launch_mpir_shim(
        &self,
        shim: &wire::ShimData,
        launch: &LaunchData,
        stdio: [OwnedFd; 3],
    ) -> Result<MpirResult, HelperError> {
        use cti_mpir::shim as shimlib;

        let token = shimlib::new_token();
        let launcher_name = std::path::Path::new(&shim.shimmed_launcher)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| HelperError::BinaryNotFound(shim.shimmed_launcher.clone()))?;
        let shim_dir = shimlib::ShimBinDir::create(
            &shim.shim_bin_dir_base,
            &token,
            std::path::Path::new(&shim.shim_binary),
            launcher_name,
        )?;

        // The wrapper script is what actually gets launched.
        let wrapper_path = cti_core::paths::find_executable(&launch.file)
            .ok_or_else(|| HelperError::BinaryNotFound(launch.file.clone()))?;
        let wrapper_dir = wrapper_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();

        let original_path = std::env::var("PATH").unwrap_or_default();
        let spliced = shimlib::splice_path(&original_path, &wrapper_dir, shim_dir.path());

        // Pid report pipe; the write end rides into the wrapper by fd
        // inheritance.
        let (pipe_read, pipe_write) = nix::unistd::pipe()?;

        let mut modified = launch.clone();
        modified.env.push(format!("PATH={spliced}"));
        modified.env.push(format!(
            "{}={}",
            shimlib::SHIM_OUTPUT_FD_ENV,
            pipe_write.as_raw_fd()
        ));
        modified
            .env
            .push(format!("{}={}", shimlib::SHIM_LAUNCHER_PATH_ENV, shim.shimmed_launcher));
        modified.env.push(format!("{}={}", shimlib::SHIM_ORIGINAL_PATH_ENV, original_path));
        modified
            .env
            .push(format!("{}={}", shimlib::SHIM_STDIN_FD_ENV, stdio[0].as_raw_fd()));
        modified
            .env
            .push(format!("{}={}", shimlib::SHIM_STDOUT_FD_ENV, stdio[1].as_raw_fd()));
        modified
            .env
            .push(format!("{}={}", shimlib::SHIM_STDERR_FD_ENV, stdio[2].as_raw_fd()));
        modified.env.push(format!("{}={}", shimlib::SHIM_TOKEN_ENV, token));
        modified.argv.push(token.clone());

        fork_exec(&modified, stdio)?;
        drop(pipe_write);

        // The shim reports the stopped launcher's pid, or EOF if it never
        // ran.
        let launcher_pid = {
            use std::io::Read;
            let mut pipe = std::fs::File::from(pipe_read);
            let mut buf = [0u8; 4];
            pipe.read_exact(&mut buf).map_err(|_| HelperError::Mpir(cti_mpir::MpirError::ShimNoPid))?;
            i32::from_ne_bytes(buf)
        };
        debug!(launcher_pid, "shim reported launcher pid, attaching");

        let id = self.state.lock().allocate_id();
        let result = self
            .supervisor
            .attach(id, std::path::Path::new(&shim.shimmed_launcher), launcher_pid)?;
        self.state.lock().bind_launched_pid(id, launcher_pid)?;

        // The shim stopped itself with SIGSTOP; a SIGCONT now lets it run
        // once the debugger detaches.
        let _ = kill(Pid::from_raw(launcher_pid), Signal::SIGCONT);

        Ok(result)
    }

    fn handle_attach_mpir(&mut self) -> Result<(), HelperError> {
        let (path, pid) = {
            let mut req = &self.req;
            (wire::read_str(&mut req)?, wire::read_i32(&mut req)?)
        };

        let result = (|| {
            let launcher = cti_core::paths::find_executable(&path)
                .ok_or_else(|| HelperError::BinaryNotFound(path.clone()))?;
            let id = self.state.lock().allocate_id();
            let result = self.supervisor.attach(id, &launcher, pid)?;
            self.state.lock().bind_pid(id, pid)?;
            Ok(result)
        })();
        self.write_mpir_response(result)
    }

    fn handle_read_string_mpir(&mut self) -> Result<(), HelperError> {
        let (id, symbol) = {
            let mut req = &self.req;
            (wire::read_u64(&mut req)?, wire::read_str(&mut req)?)
        };
        match self.supervisor.read_string(id, &symbol) {
            Ok(data) => self.write_response(&Response::String { success: true, data }),
            Err(err) => {
                warn!(mpir_id = id, symbol = %symbol, error = %err, "ReadStringMPIR failed");
                self.write_response(&Response::String { success: false, data: String::new() })
            }
        }
    }

    fn handle_release_mpir(&mut self) -> Result<(), HelperError> {
        let id = self.read_id()?;
        let ok = self.supervisor.release(id).is_ok();
        self.write_response(&Response::Ok { success: ok })
    }

    fn handle_wait_mpir(&mut self) -> Result<(), HelperError> {
        let id = self.read_id()?;
        match self.supervisor.wait(id) {
            Ok(success) => self.write_response(&Response::Ok { success }),
            Err(err) => {
                warn!(mpir_id = id, error = %err, "WaitMPIR failed");
                self.write_response(&Response::Ok { success: false })
            }
        }
    }

    fn handle_terminate_mpir(&mut self) -> Result<(), HelperError> {
        let id = self.read_id()?;
        let ok = self.supervisor.terminate(id).is_ok();
        self.write_response(&Response::Ok { success: ok })
    }

    fn handle_register_app(&mut self) -> Result<(), HelperError> {
        let pid = {
            let mut req = &self.req;
            wire::read_i32(&mut req)?
        };
        let id = self.state.lock().register_app(pid).unwrap_or(0);
        self.write_response(&Response::Id { id })
    }

    fn handle_register_util(&mut self) -> Result<(), HelperError> {
        let (app_id, pid) = {
            let mut req = &self.req;
            (wire::read_u64(&mut req)?, wire::read_i32(&mut req)?)
        };
        let ok = self.state.lock().register_util(app_id, pid).is_ok();
        self.write_response(&Response::Ok { success: ok })
    }

    fn handle_deregister_app(&mut self) -> Result<(), HelperError> {
        let id = self.read_id()?;
        let ok = self.state.lock().deregister_app(id).is_ok();
        self.write_response(&Response::Ok { success: ok })
    }

    fn handle_release_app(&mut self) -> Result<(), HelperError> {
        let id = self.read_id()?;
        let ok = self.state.lock().release_app(id).is_ok();
        self.write_response(&Response::Ok { success: ok })
    }

    fn handle_check_app(&mut self) -> Result<(), HelperError> {
        let id = self.read_id()?;
        let alive = self.state.lock().check_app(id).unwrap_or(false);
        self.write_response(&Response::Ok { success: alive })
    }

    fn read_id(&mut self) -> Result<u64, HelperError> {
        let mut req = &self.req;
        Ok(wire::read_u64(&mut req)?)
    }

    fn write_response(&mut self, resp: &Response) -> Result<(), HelperError> {
        let mut out = &self.resp;
        wire::write_response(&mut out, resp)?;
        Ok(())
    }

    fn write_mpir_response(&mut self, result: Result<MpirResult, HelperError>) -> Result<(), HelperError> {
        let resp = match result {
            Ok(data) => Response::Mpir(Ok(wire::MpirData {
                id: data.id,
                launcher_pid: data.launcher_pid,
                job_id: data.job_id,
                step_id: data.step_id,
                proctable: data
                    .proctable
                    .entries()
                    .iter()
                    .map(|entry| wire::ProcEntry {
                        pid: entry.pid,
                        hostname: entry.hostname.clone(),
                        executable: entry.executable.clone(),
                    })
                    .collect(),
            })),
            Err(err) => {
                warn!(error = %err, "MPIR request failed");
                Response::Mpir(Err(err.to_string()))
            }
        };
        self.write_response(&resp)
    }

    fn spawn_signal_thread(&self) -> Result<(), HelperError> {
        let mut signals = Signals::new([SIGCHLD, SIGTERM, SIGHUP, SIGPIPE])?;
        let state = Arc::clone(&self.state);
        let waiters = Arc::clone(&self.sync_waiters);
        let req = self.req.try_clone()?;

        std::thread::spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGCHLD => reap_children(&state, &waiters),
                    SIGTERM | SIGHUP => {
                        info!(signal, "termination signal, closing request stream");
                        // EOF-kicks the main loop out of its blocking read.
                        let _ = req.shutdown(Shutdown::Both);
                    }
                    // SIGPIPE: claimed so a dead parent surfaces as a write
                    // error instead of killing us.
                    _ => {}
                }
            }
        });
        Ok(())
    }

    fn cleanup(&mut self) {
        self.supervisor.terminate_all();
        self.state.lock().clear_all();
    }
}

/// Drain every exit the kernel has for us.
fn reap_children(state: &Arc<Mutex<HelperState>>, waiters: &SyncWaiters) {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                handle_exit(state, waiters, pid.as_raw(), code);
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                handle_exit(state, waiters, pid.as_raw(), 128 + signal as i32);
            }
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

fn handle_exit(state: &Arc<Mutex<HelperState>>, waiters: &SyncWaiters, pid: i32, code: i32) {
    if let Some(tx) = waiters.lock().remove(&pid) {
        let _ = tx.send(code);
        return;
    }
    let utils = state.lock().on_child_exit(pid);
    if let Some(mut utils) = utils {
        debug!(pid, "app exited, clearing its utilities");
        std::thread::spawn(move || utils.clear());
    }
}
