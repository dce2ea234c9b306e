// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cti-wlm: workload-manager drivers.
//!
//! Each driver implements the same capability set (launch or attach to a
//! parallel job, query its placement, broadcast files to its compute
//! nodes, run a command on every node, signal it) in terms of that WLM's
//! own tooling. Everything process-shaped goes through the supervisor
//! helper so job and utility lifetimes stay bound to the tool.

pub mod alps;
pub mod detect;
mod driver;
mod error;
pub mod flux;
mod hostlist;
pub mod localhost;
pub mod pals;
pub mod slurm;
pub mod ssh;
pub mod subprocess;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use driver::{BarrierMode, JobLaunchSpec, JobRef, StdioFds, Synchrony, WlmDriver, WlmJob};
pub use error::WlmError;
pub use hostlist::expand_hostlist;
