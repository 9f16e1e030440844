use super::{encode_prefixed_int, encode_string_literal, static_table};

/// Encodes a header field list into a QPACK header block: the 2-byte
/// field-section prefix (RIC=0, sign=0, delta-base=0) followed by one field
/// line per (name, value) pair.
///
/// Names are lowercased defensively; callers are expected to already produce
/// lowercase names per the engine's header contract.
pub fn encode<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<u8> {
    let mut out = Vec::new();
    // Field section prefix: Required Insert Count = 0 (1 byte), then
    // Sign = 0, Delta Base = 0 (1 byte). Static table only means RIC is
    // always 0, so this is always exactly these two zero bytes.
    out.push(0x00);
    out.push(0x00);

    for (name, value) in fields {
        encode_field(&mut out, name, value);
    }

    out
}

fn encode_field(out: &mut Vec<u8>, name: &str, value: &str) {
    if let Some(index) = static_table::find(name, value) {
        // Indexed Field Line: 1Txxxxxx, T=1 for static table.
        encode_prefixed_int(out, 0b1100_0000, 6, index as u64);
        return;
    }

    if let Some(index) = static_table::find_name(name) {
        if index < 16 {
            // Literal with Name Reference: 01NTxxxx, N=0, T=1.
            encode_prefixed_int(out, 0b0101_0000, 4, index as u64);
            encode_string_literal(out, value.as_bytes());
            return;
        }
    }

    // Literal with Literal Name: 001NHxxx, N=0; H depends on the name's own
    // huffman saving, encoded via the 3-bit name-length prefix.
    let lower = name.to_ascii_lowercase();
    let name_bytes = lower.as_bytes();
    let huffman_len = crate::huffman::encoded_len(name_bytes);
    if huffman_len < name_bytes.len() {
        let huffman = crate::huffman::encode(name_bytes);
        encode_prefixed_int(out, 0b0010_1000, 3, huffman.len() as u64);
        out.extend_from_slice(&huffman);
    } else {
        encode_prefixed_int(out, 0b0010_0000, 3, name_bytes.len() as u64);
        out.extend_from_slice(name_bytes);
    }
    encode_string_literal(out, value.as_bytes());
}
