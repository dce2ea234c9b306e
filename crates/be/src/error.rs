// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BeError {
    #[error("environment variable {0} is not set; not running under the tool launcher?")]
    MissingEnv(&'static str),
    #[error("{0} does not name a known WLM")]
    BadWlm(String),
    #[error("pmi_attribs at {path:?} did not appear within {timeout_s}s")]
    AttribsTimeout { path: PathBuf, timeout_s: u64 },
    #[error("malformed pmi_attribs: {0}")]
    BadAttribs(String),
    #[error("no placement information for this node ({hostname})")]
    NodeNotInJob { hostname: String },
    #[error("layout: {0}")]
    Layout(#[from] cti_core::LayoutError),
    #[error("archive extraction failed: {0}")]
    Extract(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
