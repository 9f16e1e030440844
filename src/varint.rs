//! RFC 9000 Section 16 variable-length integer codec.
//!
//! A varint is encoded in 1, 2, 4, or 8 bytes, selected by the two most
//! significant bits of the first byte (`00`, `01`, `10`, `11` for widths
//! 1, 2, 4, 8 respectively). The remaining 6, 14, 30, or 62 bits hold the
//! value big-endian.

/// Largest value a varint can hold (2^62 - 1).
pub const MAX: u64 = (1 << 62) - 1;

/// Encodes `value` into its minimal varint representation.
///
/// # Panics
///
/// Panics if `value` exceeds [`MAX`].
pub fn encode(value: u64) -> Vec<u8> {
    assert!(value <= MAX, "varint value {value} exceeds 2^62-1");
    if value < (1 << 6) {
        vec![value as u8]
    } else if value < (1 << 14) {
        let mut bytes = (value as u16).to_be_bytes();
        bytes[0] |= 0b0100_0000;
        bytes.to_vec()
    } else if value < (1 << 30) {
        let mut bytes = (value as u32).to_be_bytes();
        bytes[0] |= 0b1000_0000;
        bytes.to_vec()
    } else {
        let mut bytes = value.to_be_bytes();
        bytes[0] |= 0b1100_0000;
        bytes.to_vec()
    }
}

/// The encoded width, in bytes, that `value` would take.
pub fn encoded_len(value: u64) -> usize {
    if value < (1 << 6) {
        1
    } else if value < (1 << 14) {
        2
    } else if value < (1 << 30) {
        4
    } else {
        8
    }
}

/// Decodes a varint from `buf` starting at `offset`.
///
/// Returns `(value, bytes_consumed)`. On any under-run (insufficient bytes
/// for the width the prefix declares) returns `(0, 0)` rather than erroring
/// or panicking, so callers can treat it as "need more data".
pub fn decode(buf: &[u8], offset: usize) -> (u64, usize) {
    let Some(&first) = buf.get(offset) else {
        return (0, 0);
    };
    let width = 1usize << (first >> 6);
    if offset + width > buf.len() {
        return (0, 0);
    }
    let mut value = u64::from(first & 0b0011_1111);
    for &byte in &buf[offset + 1..offset + width] {
        value = (value << 8) | u64::from(byte);
    }
    (value, width)
}
