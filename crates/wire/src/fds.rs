// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stdio fd transfer over the request socket.
//!
//! The three standard fds for a launch request are sent as one
//! `SCM_RIGHTS` ancillary message attached to a single dummy byte. The
//! `#[allow(unsafe_code)]` functions below are the only unsafe code in the
//! workspace: adopting kernel-provided descriptor numbers into owned
//! handles.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::io::ProtocolError;

const N_STDIO_FDS: usize = 3;

/// Send `[stdin, stdout, stderr]` over `sock`.
pub fn send_stdio_fds(sock: &UnixStream, fds: [RawFd; N_STDIO_FDS]) -> Result<(), ProtocolError> {
    let dummy = [0u8; 1];
    let iov = [IoSlice::new(&dummy)];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    sendmsg::<()>(sock.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
        .map_err(ProtocolError::Fd)?;
    Ok(())
}

/// Receive the `[stdin, stdout, stderr]` triple sent by [`send_stdio_fds`].
pub fn recv_stdio_fds(sock: &UnixStream) -> Result<[OwnedFd; N_STDIO_FDS], ProtocolError> {
    let mut dummy = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut dummy)];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; N_STDIO_FDS]);

    let msg = recvmsg::<()>(
        sock.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::empty(),
    )
    .map_err(ProtocolError::Fd)?;

    let mut raw = Vec::with_capacity(N_STDIO_FDS);
    for cmsg in msg.cmsgs().map_err(ProtocolError::Fd)? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            raw.extend(fds);
        }
    }

    if raw.len() != N_STDIO_FDS {
        let received = raw.len();
        // Adopt whatever arrived so nothing leaks before reporting.
        for fd in raw {
            drop(adopt_fd(fd));
        }
        return Err(ProtocolError::BadFdCount { expected: N_STDIO_FDS, received });
    }

    Ok([adopt_fd(raw[0]), adopt_fd(raw[1]), adopt_fd(raw[2])])
}

/// Rebuild the stream the parent left on an inherited descriptor number.
/// Callers must pass a descriptor this process actually inherited and owns.
#[allow(unsafe_code)]
pub fn socket_from_inherited_fd(fd: RawFd) -> UnixStream {
    unsafe { UnixStream::from_raw_fd(fd) }
}

/// Same adoption for plain files and pipes (the MPIR shim's report pipe).
#[allow(unsafe_code)]
pub fn file_from_inherited_fd(fd: RawFd) -> std::fs::File {
    use std::fs::File;
    unsafe { File::from_raw_fd(fd) }
}

#[allow(unsafe_code)]
fn adopt_fd(fd: RawFd) -> OwnedFd {
    // The kernel installed `fd` into this process for us via SCM_RIGHTS;
    // nothing else holds it.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

#[cfg(test)]
#[path = "fds_tests.rs"]
mod tests;
