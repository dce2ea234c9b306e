// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Last-error plumbing for the exported shim layer.
//!
//! Errors never unwind across the public boundary: every external entry
//! runs under [`catching`], which stashes the formatted error where
//! [`error_str`] can see it and lets the shim return its sentinel value.

use parking_lot::Mutex;

use crate::error::CtiError;

static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

const DEFAULT_ERROR: &str = "Unknown CTI error";

/// Run a fallible operation, capturing any failure as the last error.
pub fn catching<T>(op: impl FnOnce() -> Result<T, CtiError>) -> Option<T> {
    match op() {
        Ok(value) => Some(value),
        Err(err) => {
            record(&err);
            None
        }
    }
}

pub fn record(err: &CtiError) {
    *LAST_ERROR.lock() = Some(format!("{}: {err}", err.kind()));
}

/// The most recent failure, formatted for humans.
pub fn error_str() -> String {
    LAST_ERROR.lock().clone().unwrap_or_else(|| DEFAULT_ERROR.to_string())
}

/// Reentrant variant: copy into a caller buffer, NUL-terminated,
/// truncating if needed. Returns 0 on success, 1 on a zero-length buffer.
pub fn error_str_r(buf: &mut [u8]) -> i32 {
    if buf.is_empty() {
        return 1;
    }
    let message = error_str();
    let copy_len = message.len().min(buf.len() - 1);
    buf[..copy_len].copy_from_slice(&message.as_bytes()[..copy_len]);
    buf[copy_len] = 0;
    0
}

/// Clear state between independent API calls in tests.
pub fn clear() {
    *LAST_ERROR.lock() = None;
}

#[cfg(test)]
#[path = "iface_tests.rs"]
mod tests;
