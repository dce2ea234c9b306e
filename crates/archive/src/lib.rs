// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cti-archive: builds the single shippable package for one manifest.
//!
//! The package is a plain POSIX tar whose entries are relative to the
//! remote sandbox root: `bin/<name>`, `lib/<name>` (and `lib/<dir>/…` for
//! library-directory trees), and bare `<name>` for plain files. The WLM's
//! broadcast primitive ships it; the backend launcher unpacks it.

mod builder;

pub use builder::{ArchiveBuilder, ArchiveError, Package};
