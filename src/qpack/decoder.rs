use super::{decode_prefixed_int, decode_string_literal, static_table, FieldList};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("header block truncated")]
    Truncated,
    #[error("unknown field line pattern")]
    UnknownPattern,
    #[error("static table index out of bounds")]
    IndexOutOfBounds,
    #[error("field line references the dynamic table, which this decoder does not support")]
    DynamicTableUnsupported,
    #[error("huffman decode failed: {0}")]
    Huffman(String),
    #[error("header list exceeds the configured maximum size ({0} bytes)")]
    HeaderTooLong(usize),
}

/// Decodes a QPACK header block (field-section prefix + field lines) into an
/// ordered list of (name, value) pairs. `max_field_section_size` bounds the
/// RFC 6800-style accounting size (name.len() + value.len() + 32 per field).
pub fn decode(buf: &[u8], max_field_section_size: u64) -> Result<FieldList, DecodeError> {
    let mut pos = skip_field_section_prefix(buf)?;
    let mut fields = FieldList::new();
    let mut size: u64 = 0;

    while pos < buf.len() {
        let (name, value, consumed) = decode_field_line(buf, pos)?;
        size += name.len() as u64 + value.len() as u64 + 32;
        if size > max_field_section_size {
            return Err(DecodeError::HeaderTooLong(max_field_section_size as usize));
        }
        fields.push((name, value));
        pos += consumed;
    }

    Ok(fields)
}

fn skip_field_section_prefix(buf: &[u8]) -> Result<usize, DecodeError> {
    let (_, ric_width) = decode_prefixed_int(buf, 0, 8).ok_or(DecodeError::Truncated)?;
    let (_, base_width) = decode_prefixed_int(buf, ric_width, 7).ok_or(DecodeError::Truncated)?;
    Ok(ric_width + base_width)
}

fn decode_field_line(buf: &[u8], pos: usize) -> Result<(String, String, usize), DecodeError> {
    let first = *buf.get(pos).ok_or(DecodeError::Truncated)?;

    if first & 0x80 != 0 {
        // Indexed Field Line: 1Txxxxxx
        let is_static = first & 0x40 != 0;
        let (index, width) = decode_prefixed_int(buf, pos, 6).ok_or(DecodeError::Truncated)?;
        if !is_static {
            return Err(DecodeError::DynamicTableUnsupported);
        }
        let entry = static_table::get(index as usize).ok_or(DecodeError::IndexOutOfBounds)?;
        return Ok((entry.name.to_string(), entry.value.to_string(), width));
    }

    if first & 0xC0 == 0x40 {
        // Literal with Name Reference: 01NTxxxx
        let is_static = first & 0x10 != 0;
        let (index, name_width) = decode_prefixed_int(buf, pos, 4).ok_or(DecodeError::Truncated)?;
        if !is_static {
            return Err(DecodeError::DynamicTableUnsupported);
        }
        let entry = static_table::get(index as usize).ok_or(DecodeError::IndexOutOfBounds)?;
        let (value_bytes, value_width) = decode_string_literal(buf, pos + name_width)?;
        let value = String::from_utf8_lossy(&value_bytes).into_owned();
        return Ok((entry.name.to_string(), value, name_width + value_width));
    }

    if first & 0xE0 == 0x20 {
        // Literal with Literal Name: 001NHxxx
        let huffman = first & 0x08 != 0;
        let (name_len, len_width) = decode_prefixed_int(buf, pos, 3).ok_or(DecodeError::Truncated)?;
        let name_len = name_len as usize;
        let name_start = pos + len_width;
        let name_end = name_start.checked_add(name_len).ok_or(DecodeError::Truncated)?;
        let name_raw = buf.get(name_start..name_end).ok_or(DecodeError::Truncated)?;
        let name_bytes = if huffman {
            crate::huffman::decode(name_raw).map_err(|e| DecodeError::Huffman(e.to_string()))?
        } else {
            name_raw.to_vec()
        };
        let name = String::from_utf8_lossy(&name_bytes).to_ascii_lowercase();
        let (value_bytes, value_width) = decode_string_literal(buf, name_end)?;
        let value = String::from_utf8_lossy(&value_bytes).into_owned();
        return Ok((name, value, (name_end - pos) + value_width));
    }

    Err(DecodeError::UnknownPattern)
}
