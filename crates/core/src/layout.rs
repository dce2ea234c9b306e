// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary node-layout and pid files staged for backend daemons.
//!
//! Used when the WLM's own PMI attribute file is absent on the compute
//! node. Layout file: `{i32 num_nodes}` header followed by `num_nodes`
//! records of `{host: [u8; 9], pes_here: i32, first_pe: i32}`; the pid file
//! is `{i32 num_pids}` followed by one `i32` per pid in MPIR rank order.
//! All integers little-endian.

use std::io::{Read, Write};

use thiserror::Error;

/// File name of the layout blob inside the staged sandbox.
pub const LAYOUT_FILE_NAME: &str = "slurm_layout";
/// File name of the rank-ordered pid blob inside the staged sandbox.
pub const PID_FILE_NAME: &str = "slurm_pid";

/// Fixed record width for the hostname, trailing NUL included.
pub const LAYOUT_HOST_LEN: usize = 9;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("hostname too large for layout buffer: {0:?}")]
    HostnameTooLong(String),
    #[error("layout file is truncated")]
    Truncated,
    #[error("layout file contains a negative count")]
    NegativeCount,
    #[error("layout hostname is not valid UTF-8")]
    BadHostname,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One node record of the layout file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    pub hostname: String,
    pub pes_here: i32,
    pub first_pe: i32,
}

pub fn write_layout<W: Write>(writer: &mut W, nodes: &[NodeLayout]) -> Result<(), LayoutError> {
    writer.write_all(&(nodes.len() as i32).to_le_bytes())?;
    for node in nodes {
        // Trailing NUL must fit inside the fixed-size host buffer.
        if node.hostname.len() + 1 > LAYOUT_HOST_LEN {
            return Err(LayoutError::HostnameTooLong(node.hostname.clone()));
        }
        let mut host = [0u8; LAYOUT_HOST_LEN];
        host[..node.hostname.len()].copy_from_slice(node.hostname.as_bytes());
        writer.write_all(&host)?;
        writer.write_all(&node.pes_here.to_le_bytes())?;
        writer.write_all(&node.first_pe.to_le_bytes())?;
    }
    Ok(())
}

pub fn read_layout<R: Read>(reader: &mut R) -> Result<Vec<NodeLayout>, LayoutError> {
    let count = read_i32(reader)?;
    if count < 0 {
        return Err(LayoutError::NegativeCount);
    }
    let mut nodes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut host = [0u8; LAYOUT_HOST_LEN];
        read_exact(reader, &mut host)?;
        let len = host.iter().position(|b| *b == 0).unwrap_or(LAYOUT_HOST_LEN);
        let hostname = std::str::from_utf8(&host[..len])
            .map_err(|_| LayoutError::BadHostname)?
            .to_string();
        let pes_here = read_i32(reader)?;
        let first_pe = read_i32(reader)?;
        nodes.push(NodeLayout { hostname, pes_here, first_pe });
    }
    Ok(nodes)
}

pub fn write_pids<W: Write>(writer: &mut W, pids: &[i32]) -> Result<(), LayoutError> {
    writer.write_all(&(pids.len() as i32).to_le_bytes())?;
    for pid in pids {
        writer.write_all(&pid.to_le_bytes())?;
    }
    Ok(())
}

pub fn read_pids<R: Read>(reader: &mut R) -> Result<Vec<i32>, LayoutError> {
    let count = read_i32(reader)?;
    if count < 0 {
        return Err(LayoutError::NegativeCount);
    }
    let mut pids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        pids.push(read_i32(reader)?);
    }
    Ok(pids)
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, LayoutError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), LayoutError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            LayoutError::Truncated
        } else {
            LayoutError::Io(err)
        }
    })
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
