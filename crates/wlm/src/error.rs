// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WlmError {
    /// A WLM tool exited nonzero; `stderr` is passed through verbatim.
    #[error("{command} failed (exit {status}): {stderr}")]
    CommandFailed { command: String, status: i32, stderr: String },
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("job {0} is not running")]
    NotRunning(String),
    #[error("startup barrier already released")]
    BarrierReleased,
    #[error("could not parse {tool} output: {detail}")]
    Parse { tool: &'static str, detail: String },
    #[error("{0}")]
    Unsupported(String),
    #[error("job reference {0:?} is not valid for this WLM")]
    BadJobRef(String),
    #[error(transparent)]
    Helper(#[from] cti_helper::HelperError),
    #[error("placement: {0}")]
    Placement(#[from] cti_core::placement::PlacementError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
