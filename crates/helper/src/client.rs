// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frontend-side handle to the supervisor helper.
//!
//! One helper per frontend; requests serialize under a lock so that every
//! request sees exactly its own response.

use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use cti_core::DaemonId;
use cti_wire::{self as wire, LaunchData, MpirData, Response, RunMode, ShimData};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::HelperError;

struct Channels {
    req: UnixStream,
    resp: UnixStream,
}

pub struct HelperClient {
    channels: Mutex<Channels>,
    child: Mutex<Option<Child>>,
    helper_pid: u64,
    /// Set in forked children: never signal the shared helper.
    suppressed: AtomicBool,
}

impl HelperClient {
    /// Spawn the helper binary and complete the pid handshake.
    pub fn spawn(helper_path: &Path) -> Result<Self, HelperError> {
        let (req_local, req_remote) = UnixStream::pair()?;
        let (resp_local, resp_remote) = UnixStream::pair()?;

        // The remote ends must survive exec.
        clear_cloexec(req_remote.as_raw_fd())?;
        clear_cloexec(resp_remote.as_raw_fd())?;

        let child = Command::new(helper_path)
            .arg("--read-fd")
            .arg(req_remote.as_raw_fd().to_string())
            .arg("--write-fd")
            .arg(resp_remote.as_raw_fd().to_string())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| HelperError::Spawn { path: helper_path.to_path_buf(), source })?;
        drop(req_remote);
        drop(resp_remote);

        // First response is the helper announcing its pid.
        let helper_pid = {
            let mut resp = &resp_local;
            match wire::read_response(&mut resp)? {
                Response::Id { id } if id != 0 => id,
                other => {
                    return Err(HelperError::Handshake(format!(
                        "expected pid announcement, got {other:?}"
                    )))
                }
            }
        };
        debug!(helper_pid, "supervisor helper ready");

        Ok(Self {
            channels: Mutex::new(Channels { req: req_local, resp: resp_local }),
            child: Mutex::new(Some(child)),
            helper_pid,
            suppressed: AtomicBool::new(false),
        })
    }

    /// Attach to an already-connected pair of control streams (an
    /// in-process server, or a helper spawned by other means).
    pub fn connect(req: UnixStream, resp: UnixStream) -> Result<Self, HelperError> {
        let helper_pid = {
            let mut stream = &resp;
            match wire::read_response(&mut stream)? {
                Response::Id { id } if id != 0 => id,
                other => {
                    return Err(HelperError::Handshake(format!(
                        "expected pid announcement, got {other:?}"
                    )))
                }
            }
        };
        Ok(Self {
            channels: Mutex::new(Channels { req, resp }),
            child: Mutex::new(None),
            helper_pid,
            suppressed: AtomicBool::new(false),
        })
    }

    pub fn helper_pid(&self) -> u64 {
        self.helper_pid
    }

    /// Disarm this handle. Used after fork: the child must not shut down
    /// the parent's helper.
    pub fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }

    /// Launch an app under the helper. Returns its id and the child pid.
    pub fn fork_execvp_app(
        &self,
        launch: &LaunchData,
        stdio: [RawFd; 3],
    ) -> Result<(DaemonId, i32), HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::ForkExecvpApp as u8)?;
        }
        wire::send_stdio_fds(&channels.req, stdio)?;
        {
            let mut req = &channels.req;
            wire::write_launch_data(&mut req, launch)?;
        }
        let data = Self::expect_mpir(&channels)?;
        Ok((DaemonId::new(data.id), data.launcher_pid))
    }

    pub fn fork_execvp_util(
        &self,
        app: DaemonId,
        mode: RunMode,
        launch: &LaunchData,
        stdio: [RawFd; 3],
    ) -> Result<bool, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::ForkExecvpUtil as u8)?;
            wire::write_u64(&mut req, app.raw())?;
            wire::write_run_mode(&mut req, mode)?;
        }
        wire::send_stdio_fds(&channels.req, stdio)?;
        {
            let mut req = &channels.req;
            wire::write_launch_data(&mut req, launch)?;
        }
        Self::expect_ok(&channels)
    }

    pub fn launch_mpir(
        &self,
        launch: &LaunchData,
        stdio: [RawFd; 3],
    ) -> Result<MpirData, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::LaunchMpir as u8)?;
        }
        wire::send_stdio_fds(&channels.req, stdio)?;
        {
            let mut req = &channels.req;
            wire::write_launch_data(&mut req, launch)?;
        }
        Self::expect_mpir(&channels)
    }

    pub fn launch_mpir_shim(
        &self,
        shim: &ShimData,
        launch: &LaunchData,
        stdio: [RawFd; 3],
    ) -> Result<MpirData, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::LaunchMpirShim as u8)?;
            wire::write_shim_data(&mut req, shim)?;
        }
        wire::send_stdio_fds(&channels.req, stdio)?;
        {
            let mut req = &channels.req;
            wire::write_launch_data(&mut req, launch)?;
        }
        Self::expect_mpir(&channels)
    }

    pub fn attach_mpir(&self, launcher: &str, pid: i32) -> Result<MpirData, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::AttachMpir as u8)?;
            wire::write_str(&mut req, launcher)?;
            wire::write_i32(&mut req, pid)?;
        }
        Self::expect_mpir(&channels)
    }

    pub fn read_string_mpir(&self, id: DaemonId, symbol: &str) -> Result<String, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::ReadStringMpir as u8)?;
            wire::write_u64(&mut req, id.raw())?;
            wire::write_str(&mut req, symbol)?;
        }
        let mut resp = &channels.resp;
        match wire::read_response(&mut resp)? {
            Response::String { success: true, data } => Ok(data),
            Response::String { success: false, .. } => {
                Err(HelperError::Rejected(format!("could not read {symbol:?} from launcher")))
            }
            other => Err(HelperError::Handshake(format!("unexpected response {other:?}"))),
        }
    }

    pub fn release_mpir(&self, id: DaemonId) -> Result<(), HelperError> {
        if self.simple_ok(wire::ReqType::ReleaseMpir, id.raw())? {
            Ok(())
        } else {
            Err(HelperError::InvalidId(id.raw()))
        }
    }

    /// Returns true iff the launcher exited cleanly.
    pub fn wait_mpir(&self, id: DaemonId) -> Result<bool, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::WaitMpir as u8)?;
            wire::write_u64(&mut req, id.raw())?;
        }
        Self::expect_ok(&channels)
    }

    pub fn terminate_mpir(&self, id: DaemonId) -> Result<(), HelperError> {
        if self.simple_ok(wire::ReqType::TerminateMpir, id.raw())? {
            Ok(())
        } else {
            Err(HelperError::InvalidId(id.raw()))
        }
    }

    pub fn register_app(&self, pid: i32) -> Result<DaemonId, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::RegisterApp as u8)?;
            wire::write_i32(&mut req, pid)?;
        }
        Self::expect_id(&channels)
    }

    pub fn register_util(&self, app: DaemonId, pid: i32) -> Result<(), HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::RegisterUtil as u8)?;
            wire::write_u64(&mut req, app.raw())?;
            wire::write_i32(&mut req, pid)?;
        }
        if Self::expect_ok(&channels)? {
            Ok(())
        } else {
            Err(HelperError::Rejected(format!("helper refused utility pid {pid}")))
        }
    }

    pub fn deregister_app(&self, app: DaemonId) -> Result<(), HelperError> {
        if self.suppressed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.simple_ok(wire::ReqType::DeregisterApp, app.raw())? {
            Ok(())
        } else {
            Err(HelperError::InvalidId(app.raw()))
        }
    }

    pub fn release_app(&self, app: DaemonId) -> Result<(), HelperError> {
        if self.suppressed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.simple_ok(wire::ReqType::ReleaseApp, app.raw())? {
            Ok(())
        } else {
            Err(HelperError::InvalidId(app.raw()))
        }
    }

    pub fn check_app(&self, app: DaemonId) -> Result<bool, HelperError> {
        self.simple_ok(wire::ReqType::CheckApp, app.raw())
    }

    /// Orderly shutdown; waits for the helper to exit.
    pub fn shutdown(&self) -> Result<(), HelperError> {
        if self.suppressed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let channels = self.channels.lock();
            let mut req = &channels.req;
            wire::write_u8(&mut req, wire::ReqType::Shutdown as u8)?;
            let mut resp = &channels.resp;
            let _ = wire::read_response(&mut resp)?;
        }
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.wait();
        }
        Ok(())
    }

    fn simple_ok(&self, tag: wire::ReqType, id: u64) -> Result<bool, HelperError> {
        let channels = self.channels.lock();
        {
            let mut req = &channels.req;
            wire::write_u8(&mut req, tag as u8)?;
            wire::write_u64(&mut req, id)?;
        }
        Self::expect_ok(&channels)
    }

    fn expect_ok(channels: &Channels) -> Result<bool, HelperError> {
        let mut resp = &channels.resp;
        match wire::read_response(&mut resp)? {
            Response::Ok { success } => Ok(success),
            other => Err(HelperError::Handshake(format!("unexpected response {other:?}"))),
        }
    }

    fn expect_id(channels: &Channels) -> Result<DaemonId, HelperError> {
        let mut resp = &channels.resp;
        match wire::read_response(&mut resp)? {
            Response::Id { id } if id != 0 => Ok(DaemonId::new(id)),
            Response::Id { .. } => {
                Err(HelperError::Rejected("helper could not launch or register".to_string()))
            }
            other => Err(HelperError::Handshake(format!("unexpected response {other:?}"))),
        }
    }

    fn expect_mpir(channels: &Channels) -> Result<MpirData, HelperError> {
        let mut resp = &channels.resp;
        match wire::read_response(&mut resp)? {
            Response::Mpir(Ok(data)) => Ok(data),
            Response::Mpir(Err(message)) => Err(HelperError::Rejected(message)),
            other => Err(HelperError::Handshake(format!("unexpected response {other:?}"))),
        }
    }
}

impl Drop for HelperClient {
    fn drop(&mut self) {
        if self.suppressed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "helper shutdown on drop failed");
        }
    }
}

fn clear_cloexec(fd: RawFd) -> Result<(), HelperError> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
    Ok(())
}
