//! RFC 9114 Section 7 frame envelopes: `type` varint, `length` varint, then
//! `length` bytes of payload. Frame types that only belong on the control
//! stream are rejected when seen on a request stream by [`crate::message`].

use bytes::Bytes;

use crate::varint;

pub const TYPE_DATA: u64 = 0x00;
pub const TYPE_HEADERS: u64 = 0x01;
pub const TYPE_CANCEL_PUSH: u64 = 0x03;
pub const TYPE_SETTINGS: u64 = 0x04;
pub const TYPE_PUSH_PROMISE: u64 = 0x05;
pub const TYPE_GOAWAY: u64 = 0x07;
pub const TYPE_MAX_PUSH_ID: u64 = 0x0d;

/// Frame types forbidden on a bidirectional request stream (spec Section 3).
pub const CONTROL_ONLY_TYPES: [u64; 4] = [TYPE_SETTINGS, TYPE_GOAWAY, TYPE_CANCEL_PUSH, TYPE_MAX_PUSH_ID];

/// Unidirectional stream type bytes (Section 6.2).
pub const STREAM_TYPE_CONTROL: u8 = 0x00;
pub const STREAM_TYPE_QPACK_ENCODER: u8 = 0x02;
pub const STREAM_TYPE_QPACK_DECODER: u8 = 0x03;

/// The GOAWAY stream-id sentinel a server sends as its *first* GOAWAY,
/// before it knows the last stream id it will process (Section 5.2).
pub const GOAWAY_SENTINEL: u64 = (1 << 62) - 4;

/// QPACK SETTINGS this engine advertises: no dynamic table, no blocking.
pub const SETTINGS_QPACK_MAX_TABLE_CAPACITY: u64 = 0;
pub const SETTINGS_QPACK_BLOCKED_STREAMS: u64 = 0;

const SETTING_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
const SETTING_QPACK_BLOCKED_STREAMS: u64 = 0x07;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: u64, payload: impl Into<Bytes>) -> Self {
        Frame {
            frame_type,
            payload: payload.into(),
        }
    }

    pub fn is_control_only(&self) -> bool {
        CONTROL_ONLY_TYPES.contains(&self.frame_type)
    }
}

/// Serializes a single frame: `varint(type) || varint(len(payload)) || payload`.
pub fn build_frame(frame_type: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = varint::encode(frame_type);
    out.extend(varint::encode(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

/// Parses as many complete frames as `buf` holds. Stops cleanly (without
/// raising) on any under-run: a truncated type/length varint, or a declared
/// length that exceeds the remaining buffer. Returns `(frames, bytes_consumed)`
/// so the caller can retain the unconsumed tail for the next read.
pub fn parse_frames(buf: &[u8]) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;

    loop {
        let (frame_type, type_width) = varint::decode(buf, offset);
        if type_width == 0 {
            break;
        }
        let (length, len_width) = varint::decode(buf, offset + type_width);
        if len_width == 0 {
            break;
        }
        let payload_start = offset + type_width + len_width;
        let payload_end = payload_start + length as usize;
        if payload_end > buf.len() {
            break;
        }
        frames.push(Frame::new(frame_type, Bytes::copy_from_slice(&buf[payload_start..payload_end])));
        offset = payload_end;
    }

    (frames, offset)
}

/// The unidirectional control-stream prelude: stream-type byte 0x00 followed
/// by this engine's SETTINGS frame (QPACK dynamic table and blocking both
/// disabled).
pub fn control_stream_prelude() -> Vec<u8> {
    let mut out = vec![STREAM_TYPE_CONTROL];
    out.extend(build_frame(TYPE_SETTINGS, &encode_settings()));
    out
}

fn encode_settings() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(varint::encode(SETTING_QPACK_MAX_TABLE_CAPACITY));
    payload.extend(varint::encode(SETTINGS_QPACK_MAX_TABLE_CAPACITY));
    payload.extend(varint::encode(SETTING_QPACK_BLOCKED_STREAMS));
    payload.extend(varint::encode(SETTINGS_QPACK_BLOCKED_STREAMS));
    payload
}

/// Decodes a SETTINGS payload into its (id, value) pairs, tolerant of unknown
/// identifiers (Section 7.2.4: "Setting identifiers... that are not
/// understood MUST be ignored").
pub fn decode_settings(payload: &[u8]) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < payload.len() {
        let (id, id_width) = varint::decode(payload, offset);
        if id_width == 0 {
            break;
        }
        let (value, value_width) = varint::decode(payload, offset + id_width);
        if value_width == 0 {
            break;
        }
        out.push((id, value));
        offset += id_width + value_width;
    }
    out
}

/// Builds a GOAWAY frame naming the given stream id as the boundary above
/// which no more requests will be processed.
pub fn build_goaway(stream_id: u64) -> Vec<u8> {
    build_frame(TYPE_GOAWAY, &varint::encode(stream_id))
}

/// Decodes a GOAWAY payload into its single stream-id varint.
pub fn decode_goaway(payload: &[u8]) -> Option<u64> {
    let (stream_id, width) = varint::decode(payload, 0);
    if width == 0 {
        None
    } else {
        Some(stream_id)
    }
}
