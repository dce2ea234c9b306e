// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn string_framing_is_length_prefix_bytes_nul() {
    let mut buf = Vec::new();
    write_str(&mut buf, "srun").unwrap();

    assert_eq!(&buf[..8], &4u64.to_ne_bytes());
    assert_eq!(&buf[8..12], b"srun");
    assert_eq!(buf[12], 0);
    assert_eq!(read_str(&mut buf.as_slice()).unwrap(), "srun");
}

#[test]
fn empty_string_round_trips() {
    let mut buf = Vec::new();
    write_str(&mut buf, "").unwrap();
    assert_eq!(read_str(&mut buf.as_slice()).unwrap(), "");
}

#[test]
fn missing_nul_is_a_framing_error() {
    let mut buf = Vec::new();
    write_str(&mut buf, "ab").unwrap();
    // Corrupt the terminator.
    let last = buf.len() - 1;
    buf[last] = b'!';
    assert!(matches!(read_str(&mut buf.as_slice()), Err(ProtocolError::MissingNul)));
}

#[test]
fn oversized_length_is_rejected_without_allocating() {
    let mut buf = Vec::new();
    write_u64(&mut buf, u64::MAX).unwrap();
    assert!(matches!(read_str(&mut buf.as_slice()), Err(ProtocolError::TooLarge(_))));
}

#[test]
fn short_reads_surface_as_disconnected() {
    let mut buf = Vec::new();
    write_str(&mut buf, "hello").unwrap();
    buf.truncate(6);
    assert!(matches!(read_str(&mut buf.as_slice()), Err(ProtocolError::Disconnected)));

    let empty: &[u8] = &[];
    assert!(matches!(read_u64(&mut { empty }), Err(ProtocolError::Disconnected)));
}

#[test]
fn integers_round_trip() {
    let mut buf = Vec::new();
    write_u8(&mut buf, 7).unwrap();
    write_u32(&mut buf, 123_456).unwrap();
    write_i32(&mut buf, -9).unwrap();
    write_u64(&mut buf, u64::MAX - 1).unwrap();

    let mut cursor = buf.as_slice();
    assert_eq!(read_u8(&mut cursor).unwrap(), 7);
    assert_eq!(read_u32(&mut cursor).unwrap(), 123_456);
    assert_eq!(read_i32(&mut cursor).unwrap(), -9);
    assert_eq!(read_u64(&mut cursor).unwrap(), u64::MAX - 1);
}
