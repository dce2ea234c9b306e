// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serial_test::serial;

use super::*;

#[test]
#[serial]
fn catching_returns_value_and_leaves_no_error() {
    clear();
    let value = catching(|| Ok::<_, CtiError>(7));
    assert_eq!(value, Some(7));
    assert_eq!(error_str(), "Unknown CTI error");
}

#[test]
#[serial]
fn failures_set_the_last_error_with_kind_prefix() {
    clear();
    let value: Option<u32> = catching(|| Err(CtiError::Usage("bad handle".to_string())));
    assert_eq!(value, None);
    assert_eq!(error_str(), "usage: bad handle");
}

#[test]
#[serial]
fn error_str_r_truncates_and_nul_terminates() {
    clear();
    record(&CtiError::Usage("a very long diagnostic message".to_string()));

    let mut small = [0u8; 12];
    assert_eq!(error_str_r(&mut small), 0);
    assert_eq!(small[11], 0);
    let text = std::str::from_utf8(&small[..11]).unwrap();
    assert!("usage: a very long diagnostic message".starts_with(text));

    let mut empty: [u8; 0] = [];
    assert_eq!(error_str_r(&mut empty), 1);
}

#[test]
#[serial]
fn newest_error_wins() {
    clear();
    record(&CtiError::Usage("first".to_string()));
    record(&CtiError::Inferior("second".to_string()));
    assert_eq!(error_str(), "inferior: inferior control: second");
}
