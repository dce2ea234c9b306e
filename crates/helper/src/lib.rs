// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cti-helper: the supervisor helper process and its frontend-side client.
//!
//! The helper (`ctifed`) is spawned by the frontend over a pair of
//! sockets and owns every process launched through it: job launchers, WLM
//! utilities, and MPIR inferiors. If the controlling tool dies, cleanly or
//! not, the helper observes EOF on its request socket and tears everything
//! down before exiting.

pub mod client;
mod error;
pub mod procset;
pub mod server;
pub mod spawn;
pub mod state;

pub use client::HelperClient;
pub use error::HelperError;
pub use server::Server;
