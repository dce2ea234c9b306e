// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workload manager selection.

use serde::{Deserialize, Serialize};

/// The workload managers a frontend can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WlmType {
    Slurm,
    Alps,
    /// MPIR-capable launcher over plain SSH.
    Ssh,
    Pals,
    Flux,
    Localhost,
}

impl WlmType {
    /// The string set accepted by `CTI_WLM_IMPL`.
    pub fn as_str(self) -> &'static str {
        match self {
            WlmType::Slurm => "slurm",
            WlmType::Alps => "alps",
            WlmType::Ssh => "generic",
            WlmType::Pals => "pals",
            WlmType::Flux => "flux",
            WlmType::Localhost => "localhost",
        }
    }

    pub fn from_impl_str(value: &str) -> Option<Self> {
        match value {
            "slurm" => Some(WlmType::Slurm),
            "alps" => Some(WlmType::Alps),
            "generic" => Some(WlmType::Ssh),
            "pals" => Some(WlmType::Pals),
            "flux" => Some(WlmType::Flux),
            "localhost" => Some(WlmType::Localhost),
            _ => None,
        }
    }
}

impl std::fmt::Display for WlmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "wlm_tests.rs"]
mod tests;
