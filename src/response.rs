//! Response synthesis: turns (status, headers, body chunks) into the HEADERS
//! (+ DATA…) frame sequence written back to a request stream (spec Section
//! 4.6).

use crate::frame;
use crate::qpack;

/// Headers the engine strips from an application-supplied response before
/// QPACK-encoding it; these are meaningless or actively wrong at the HTTP/3
/// framing layer, which already carries the semantics they'd express.
const FORBIDDEN_HEADERS: [&str; 6] = [
    "transfer-encoding",
    "connection",
    "keep-alive",
    "upgrade",
    "te",
    "proxy-connection",
];

/// Prefix marking a header name as application-internal bookkeeping that
/// must never reach the wire (spec Section 4.6). The caller may pass such
/// keys through the same `headers` list as ordinary response headers; this
/// is the one prefix the engine strips rather than the application having
/// to filter them itself. See DESIGN.md's Open Question decisions for why
/// this specific prefix was chosen.
const INTERNAL_HEADER_PREFIX: &str = "x-h3-internal-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<Vec<u8>>,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<Vec<u8>>) -> Self {
        Response { status, headers, body }
    }

    pub fn plain_text(status: u16, body: impl Into<String>) -> Self {
        Response::new(
            status,
            vec![("content-type".to_string(), "text/plain".to_string())],
            vec![body.into().into_bytes()],
        )
    }
}

/// Builds the ordered field list QPACK will encode: `:status` first, then
/// user headers with lowercase names, forbidden names and
/// `x-h3-internal-`-prefixed names stripped silently.
fn field_list(response: &Response) -> Vec<(String, String)> {
    let mut fields = Vec::with_capacity(response.headers.len() + 1);
    fields.push((":status".to_string(), format!("{:03}", response.status)));
    for (name, value) in &response.headers {
        let lower = name.to_ascii_lowercase();
        if FORBIDDEN_HEADERS.contains(&lower.as_str()) || lower.starts_with(INTERNAL_HEADER_PREFIX) {
            continue;
        }
        fields.push((lower, value.clone()));
    }
    fields
}

/// Encodes a complete (non-streaming) response into the bytes to write to a
/// request stream, in order: one HEADERS frame, then one DATA frame per
/// non-empty body chunk. The caller applies FIN after writing this.
pub fn encode(response: &Response) -> Vec<u8> {
    let fields = field_list(response);
    let refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let header_block = qpack::encode(refs);

    let mut out = frame::build_frame(frame::TYPE_HEADERS, &header_block);
    for chunk in &response.body {
        if !chunk.is_empty() {
            out.extend(frame::build_frame(frame::TYPE_DATA, chunk));
        }
    }
    out
}

/// Encodes the HEADERS frame and each DATA frame as separate writes, for a
/// streaming response where chunks are produced incrementally. Returns the
/// HEADERS frame bytes plus one entry per DATA frame; the caller is
/// responsible for marking the final write with a transport-level FIN.
pub fn encode_streaming(status: u16, headers: &[(String, String)], chunks: impl IntoIterator<Item = Vec<u8>>) -> (Vec<u8>, Vec<Vec<u8>>) {
    let response = Response::new(status, headers.to_vec(), Vec::new());
    let fields = field_list(&response);
    let refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let header_block = qpack::encode(refs);
    let headers_frame = frame::build_frame(frame::TYPE_HEADERS, &header_block);

    let data_frames: Vec<Vec<u8>> = chunks
        .into_iter()
        .filter(|c| !c.is_empty())
        .map(|c| frame::build_frame(frame::TYPE_DATA, &c))
        .collect();

    (headers_frame, data_frames)
}
