// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response payloads. A failing response always carries a diagnostic.

use std::io::{Read, Write};

use crate::io::{read_i32, read_str, read_u32, read_u64, read_u8, write_i32, write_str,
    write_u32, write_u64, write_u8, ProtocolError};
use crate::tags::RespType;

/// One proctable entry as carried by an MPIR response. Rank is implied by
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcEntry {
    pub pid: i32,
    pub hostname: String,
    pub executable: String,
}

/// Payload of a successful MPIR launch/attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpirData {
    pub id: u64,
    pub launcher_pid: i32,
    pub job_id: u32,
    pub step_id: u32,
    pub proctable: Vec<ProcEntry>,
}

/// Every response the helper can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok { success: bool },
    Id { id: u64 },
    String { success: bool, data: String },
    Mpir(Result<MpirData, String>),
}

pub fn write_response<W: Write>(writer: &mut W, resp: &Response) -> Result<(), ProtocolError> {
    match resp {
        Response::Ok { success } => {
            write_u8(writer, RespType::Ok as u8)?;
            write_u8(writer, u8::from(*success))?;
        }
        Response::Id { id } => {
            write_u8(writer, RespType::Id as u8)?;
            write_u64(writer, *id)?;
        }
        Response::String { success, data } => {
            write_u8(writer, RespType::String as u8)?;
            write_u8(writer, u8::from(*success))?;
            write_str(writer, data)?;
        }
        Response::Mpir(Ok(data)) => {
            write_u8(writer, RespType::Mpir as u8)?;
            write_u64(writer, data.id)?;
            write_i32(writer, data.launcher_pid)?;
            write_u32(writer, data.job_id)?;
            write_u32(writer, data.step_id)?;
            write_u64(writer, data.proctable.len() as u64)?;
            for entry in &data.proctable {
                write_i32(writer, entry.pid)?;
                write_str(writer, &entry.hostname)?;
                write_str(writer, &entry.executable)?;
            }
        }
        Response::Mpir(Err(message)) => {
            write_u8(writer, RespType::Mpir as u8)?;
            // Id 0 signals failure; the diagnostic follows in place of the
            // proctable.
            write_u64(writer, 0)?;
            write_str(writer, message)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_response<R: Read>(reader: &mut R) -> Result<Response, ProtocolError> {
    let tag = RespType::from_byte(read_u8(reader)?)?;
    Ok(match tag {
        RespType::Ok => Response::Ok { success: read_u8(reader)? != 0 },
        RespType::Id => Response::Id { id: read_u64(reader)? },
        RespType::String => {
            Response::String { success: read_u8(reader)? != 0, data: read_str(reader)? }
        }
        RespType::Mpir => {
            let id = read_u64(reader)?;
            if id == 0 {
                return Ok(Response::Mpir(Err(read_str(reader)?)));
            }
            let launcher_pid = read_i32(reader)?;
            let job_id = read_u32(reader)?;
            let step_id = read_u32(reader)?;
            let num_pids = read_u64(reader)?;
            let mut proctable = Vec::with_capacity(num_pids as usize);
            for _ in 0..num_pids {
                proctable.push(ProcEntry {
                    pid: read_i32(reader)?,
                    hostname: read_str(reader)?,
                    executable: read_str(reader)?,
                });
            }
            Response::Mpir(Ok(MpirData { id, launcher_pid, job_id, step_id, proctable }))
        }
    })
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
