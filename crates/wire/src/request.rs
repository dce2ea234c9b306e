// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launch-request payloads.

use std::io::{Read, Write};

use crate::io::{read_str, read_u64, read_u8, write_str, write_u64, write_u8, ProtocolError};

/// Marker prefix for environment entries that name a variable to clear in
/// the child instead of setting one.
pub const ENV_BLACKLIST_PREFIX: &str = "CTIBLACKLIST_";

/// How a utility launch is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunMode {
    /// Wait for the utility and report its exit status.
    Synchronous = 1,
    /// Report success as soon as the utility is running.
    Asynchronous = 2,
}

impl RunMode {
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            1 => Ok(RunMode::Synchronous),
            2 => Ok(RunMode::Asynchronous),
            other => Err(ProtocolError::BadTag(other)),
        }
    }
}

/// Everything needed to start a child: binary, argv, and environment
/// deltas. Stdio fds travel separately as ancillary data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchData {
    /// Binary path or bare name to resolve through `PATH`.
    pub file: String,
    /// Full argv including argv[0].
    pub argv: Vec<String>,
    /// `NAME=value` assignments to apply in the child.
    pub env: Vec<String>,
    /// Variable names to clear in the child.
    pub env_blacklist: Vec<String>,
}

/// Paths needed to interpose the MPIR shim on a wrapped launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimData {
    pub shim_binary: String,
    pub shim_bin_dir_base: String,
    pub shimmed_launcher: String,
}

pub fn write_launch_data<W: Write>(
    writer: &mut W,
    data: &LaunchData,
) -> Result<(), ProtocolError> {
    write_str(writer, &data.file)?;
    write_u64(writer, data.argv.len() as u64)?;
    for arg in &data.argv {
        write_str(writer, arg)?;
    }
    // Blacklisted names share the env list, marked by prefix.
    write_u64(writer, (data.env.len() + data.env_blacklist.len()) as u64)?;
    for entry in &data.env {
        write_str(writer, entry)?;
    }
    for name in &data.env_blacklist {
        write_str(writer, &format!("{ENV_BLACKLIST_PREFIX}{name}="))?;
    }
    Ok(())
}

pub fn read_launch_data<R: Read>(reader: &mut R) -> Result<LaunchData, ProtocolError> {
    let file = read_str(reader)?;

    let argc = read_u64(reader)?;
    let mut argv = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        argv.push(read_str(reader)?);
    }

    let envc = read_u64(reader)?;
    let mut env = Vec::new();
    let mut env_blacklist = Vec::new();
    for _ in 0..envc {
        let entry = read_str(reader)?;
        if let Some(rest) = entry.strip_prefix(ENV_BLACKLIST_PREFIX) {
            env_blacklist.push(rest.trim_end_matches('=').to_string());
        } else {
            env.push(entry);
        }
    }

    Ok(LaunchData { file, argv, env, env_blacklist })
}

pub fn write_shim_data<W: Write>(writer: &mut W, data: &ShimData) -> Result<(), ProtocolError> {
    write_str(writer, &data.shim_binary)?;
    write_str(writer, &data.shim_bin_dir_base)?;
    write_str(writer, &data.shimmed_launcher)
}

pub fn read_shim_data<R: Read>(reader: &mut R) -> Result<ShimData, ProtocolError> {
    Ok(ShimData {
        shim_binary: read_str(reader)?,
        shim_bin_dir_base: read_str(reader)?,
        shimmed_launcher: read_str(reader)?,
    })
}

pub fn write_run_mode<W: Write>(writer: &mut W, mode: RunMode) -> Result<(), ProtocolError> {
    write_u8(writer, mode as u8)
}

pub fn read_run_mode<R: Read>(reader: &mut R) -> Result<RunMode, ProtocolError> {
    RunMode::from_byte(read_u8(reader)?)
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
