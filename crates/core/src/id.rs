// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque 64-bit handles for Apps, Sessions, and Manifests.
//!
//! 0 is reserved as the error/invalid value across every id space. Ids are
//! assigned monotonically within a process lifetime and never reused.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id allocator, starting at 1.
#[derive(Debug)]
pub struct IdGen {
    next: AtomicU64,
}

impl IdGen {
    pub const fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The reserved error/invalid handle.
            pub const INVALID: Self = Self(0);

            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }

            pub const fn is_valid_handle(self) -> bool {
                self.0 != 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> u64 {
                id.0
            }
        }
    };
}

define_id! {
    /// Handle for a launched or attached parallel job.
    AppId
}

define_id! {
    /// Handle for a per-App staging context.
    SessionId
}

define_id! {
    /// Handle for a pending file-set delta to a Session.
    ManifestId
}

define_id! {
    /// Handle assigned by the supervisor helper to a process it owns.
    ///
    /// Lives in the helper's id space; the frontend treats it as opaque.
    DaemonId
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
