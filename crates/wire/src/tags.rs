// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request and response tag bytes.

use crate::io::ProtocolError;

/// Requests serviced by the supervisor helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReqType {
    ForkExecvpApp = 1,
    ForkExecvpUtil = 2,
    LaunchMpir = 3,
    LaunchMpirShim = 4,
    AttachMpir = 5,
    ReadStringMpir = 6,
    ReleaseMpir = 7,
    WaitMpir = 8,
    TerminateMpir = 9,
    RegisterApp = 10,
    RegisterUtil = 11,
    DeregisterApp = 12,
    ReleaseApp = 13,
    CheckApp = 14,
    Shutdown = 15,
}

impl ReqType {
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        Ok(match byte {
            1 => ReqType::ForkExecvpApp,
            2 => ReqType::ForkExecvpUtil,
            3 => ReqType::LaunchMpir,
            4 => ReqType::LaunchMpirShim,
            5 => ReqType::AttachMpir,
            6 => ReqType::ReadStringMpir,
            7 => ReqType::ReleaseMpir,
            8 => ReqType::WaitMpir,
            9 => ReqType::TerminateMpir,
            10 => ReqType::RegisterApp,
            11 => ReqType::RegisterUtil,
            12 => ReqType::DeregisterApp,
            13 => ReqType::ReleaseApp,
            14 => ReqType::CheckApp,
            15 => ReqType::Shutdown,
            other => return Err(ProtocolError::BadTag(other)),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ReqType::ForkExecvpApp => "ForkExecvpApp",
            ReqType::ForkExecvpUtil => "ForkExecvpUtil",
            ReqType::LaunchMpir => "LaunchMPIR",
            ReqType::LaunchMpirShim => "LaunchMPIRShim",
            ReqType::AttachMpir => "AttachMPIR",
            ReqType::ReadStringMpir => "ReadStringMPIR",
            ReqType::ReleaseMpir => "ReleaseMPIR",
            ReqType::WaitMpir => "WaitMPIR",
            ReqType::TerminateMpir => "TerminateMPIR",
            ReqType::RegisterApp => "RegisterApp",
            ReqType::RegisterUtil => "RegisterUtil",
            ReqType::DeregisterApp => "DeregisterApp",
            ReqType::ReleaseApp => "ReleaseApp",
            ReqType::CheckApp => "CheckApp",
            ReqType::Shutdown => "Shutdown",
        }
    }
}

/// Response tags; every request gets exactly one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RespType {
    Ok = 1,
    Id = 2,
    String = 3,
    Mpir = 4,
}

impl RespType {
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        Ok(match byte {
            1 => RespType::Ok,
            2 => RespType::Id,
            3 => RespType::String,
            4 => RespType::Mpir,
            other => return Err(ProtocolError::BadTag(other)),
        })
    }
}

#[cfg(test)]
#[path = "tags_tests.rs"]
mod tests;
