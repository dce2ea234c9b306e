// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Primitive framing: length-prefixed strings and fixed-width integers.

use std::io::{Read, Write};

use thiserror::Error;

/// Upper bound on a single string payload. Anything larger means the two
/// sides have lost framing.
const MAX_STRING_LEN: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("helper connection closed")]
    Disconnected,
    #[error("unknown tag byte {0:#04x}")]
    BadTag(u8),
    #[error("string payload of {0} bytes exceeds protocol limit")]
    TooLarge(u64),
    #[error("string payload is missing its NUL terminator")]
    MissingNul,
    #[error("string payload is not valid UTF-8")]
    BadUtf8,
    #[error("expected {expected} stdio fds, received {received}")]
    BadFdCount { expected: usize, received: usize },
    #[error("fd transfer failed: {0}")]
    Fd(#[source] nix::Error),
    #[error(transparent)]
    Io(std::io::Error),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Disconnected
        } else {
            ProtocolError::Io(err)
        }
    }
}

pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> Result<(), ProtocolError> {
    writer.write_all(&[value])?;
    Ok(())
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, ProtocolError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<(), ProtocolError> {
    writer.write_all(&value.to_ne_bytes())?;
    Ok(())
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_ne_bytes(buf))
}

pub fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<(), ProtocolError> {
    writer.write_all(&value.to_ne_bytes())?;
    Ok(())
}

pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32, ProtocolError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}

pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<(), ProtocolError> {
    writer.write_all(&value.to_ne_bytes())?;
    Ok(())
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64, ProtocolError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}

pub fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<(), ProtocolError> {
    write_u64(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())?;
    writer.write_all(&[0])?;
    Ok(())
}

pub fn read_str<R: Read>(reader: &mut R) -> Result<String, ProtocolError> {
    let len = read_u64(reader)?;
    if len > MAX_STRING_LEN {
        return Err(ProtocolError::TooLarge(len));
    }
    let mut buf = vec![0u8; len as usize + 1];
    reader.read_exact(&mut buf)?;
    if buf.pop() != Some(0) {
        return Err(ProtocolError::MissingNul);
    }
    String::from_utf8(buf).map_err(|_| ProtocolError::BadUtf8)
}

#[cfg(test)]
#[path = "io_tests.rs"]
mod tests;
