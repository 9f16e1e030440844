//! Request assembly: turns the frames accumulated on one request stream into
//! a semantic [`Request`] record (spec Section 4.5).

use crate::error::Error;
use crate::frame::{self, Frame};
use crate::qpack;

/// A header list with pseudo-headers already pulled out, regular headers in
/// receipt order with lowercase names, duplicates preserved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The maximum accounting size the QPACK decoder will allow for one header
/// block on a request stream; unrelated to any wire size limit on the frame
/// itself.
const MAX_FIELD_SECTION_SIZE: u64 = 64 * 1024;

/// Assembles a [`Request`] from the complete byte sequence of a request
/// stream (all chunks received up to and including FIN).
pub fn assemble(buf: &[u8]) -> Result<Request, Error> {
    let (frames, consumed) = frame::parse_frames(buf);
    if consumed != buf.len() {
        // A request stream is assembled only after FIN, so every byte must
        // resolve to a complete frame; a trailing partial frame at FIN is a
        // framing error, not "need more data".
        return Err(Error::protocol_violation("trailing partial frame at FIN"));
    }

    let mut frames = frames.into_iter();
    let headers_frame = frames.next().ok_or_else(|| Error::protocol_violation("empty request stream"))?;

    if headers_frame.is_control_only() {
        return Err(Error::protocol_violation("control-only frame on request stream"));
    }
    if headers_frame.frame_type != frame::TYPE_HEADERS {
        return Err(Error::protocol_violation("DATA before HEADERS"));
    }

    let fields = qpack::decode(&headers_frame.payload, MAX_FIELD_SECTION_SIZE)
        .map_err(|e| Error::qpack_decompression_failed(e.to_string()))?;
    let mut request = split_pseudo_headers(fields)?;

    let mut body = Vec::new();
    for f in frames {
        if f.is_control_only() {
            return Err(Error::protocol_violation("control-only frame on request stream"));
        }
        if f.frame_type == frame::TYPE_DATA {
            body.extend_from_slice(&f.payload);
        }
        // Other frame types (e.g. unknown greased types) are ignored per
        // RFC 9114 Section 9.
    }
    request.body = body;

    Ok(request)
}

fn split_pseudo_headers(fields: qpack::FieldList) -> Result<Request, Error> {
    let mut method = None;
    let mut scheme = None;
    let mut authority = None;
    let mut path = None;
    let mut headers = Vec::new();
    let mut seen_regular_header = false;

    for (name, value) in fields {
        if let Some(pseudo) = name.strip_prefix(':') {
            if seen_regular_header {
                return Err(Error::protocol_violation("pseudo-header after regular header"));
            }
            match pseudo {
                "method" => method = Some(value),
                "scheme" => scheme = Some(value),
                "authority" => authority = Some(value),
                "path" => path = Some(value),
                other => {
                    return Err(Error::protocol_violation(format!("unknown pseudo-header :{other}")));
                }
            }
        } else {
            seen_regular_header = true;
            headers.push((name, value));
        }
    }

    let method = method.ok_or_else(|| Error::protocol_violation("missing :method"))?;
    let authority = authority.ok_or_else(|| Error::protocol_violation("missing :authority"))?;

    if method != "CONNECT" {
        if scheme.is_none() {
            return Err(Error::protocol_violation("missing :scheme"));
        }
        if path.is_none() {
            return Err(Error::protocol_violation("missing :path"));
        }
    }

    let (path, query) = match path {
        Some(raw) => match raw.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (raw, None),
        },
        None => (String::new(), None),
    };

    Ok(Request {
        method,
        scheme: scheme.unwrap_or_default(),
        authority,
        path,
        query,
        headers,
        body: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_frame(fields: &[(&str, &str)]) -> Vec<u8> {
        let encoded = qpack::encode(fields.iter().copied());
        frame::build_frame(frame::TYPE_HEADERS, &encoded)
    }

    #[test]
    fn assembles_a_get_request_with_no_body() {
        let buf = headers_frame(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/"),
        ]);
        let req = assemble(&buf).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.scheme, "https");
        assert_eq!(req.authority, "example.com");
        assert_eq!(req.path, "/");
        assert_eq!(req.query, None);
        assert!(req.body.is_empty());
    }

    #[test]
    fn splits_path_and_query_at_first_question_mark() {
        let buf = headers_frame(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/search?q=rust&page=2"),
        ]);
        let req = assemble(&buf).unwrap();
        assert_eq!(req.path, "/search");
        assert_eq!(req.query.as_deref(), Some("q=rust&page=2"));
    }

    #[test]
    fn assembles_post_with_body_across_multiple_data_frames() {
        let mut buf = headers_frame(&[
            (":method", "POST"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/upload"),
        ]);
        buf.extend(frame::build_frame(frame::TYPE_DATA, b"hello "));
        buf.extend(frame::build_frame(frame::TYPE_DATA, b"world"));
        let req = assemble(&buf).unwrap();
        assert_eq!(req.body, b"hello world");
    }

    #[test]
    fn connect_does_not_require_scheme_or_path() {
        let buf = headers_frame(&[(":method", "CONNECT"), (":authority", "example.com:443")]);
        let req = assemble(&buf).unwrap();
        assert_eq!(req.method, "CONNECT");
    }

    #[test]
    fn missing_authority_is_rejected() {
        let buf = headers_frame(&[(":method", "GET"), (":scheme", "https"), (":path", "/")]);
        assert!(assemble(&buf).is_err());
    }

    #[test]
    fn data_before_headers_is_rejected() {
        let mut buf = frame::build_frame(frame::TYPE_DATA, b"oops");
        buf.extend(headers_frame(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/"),
        ]));
        assert!(assemble(&buf).is_err());
    }

    #[test]
    fn control_only_frame_on_request_stream_is_rejected() {
        let mut buf = headers_frame(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/"),
        ]);
        buf.extend(frame::build_goaway(0));
        assert!(assemble(&buf).is_err());
    }

    #[test]
    fn empty_stream_is_rejected() {
        assert!(assemble(&[]).is_err());
    }

    #[test]
    fn malformed_qpack_is_rejected_cleanly() {
        let payload = [0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let buf = frame::build_frame(frame::TYPE_HEADERS, &payload);
        assert!(assemble(&buf).is_err());
    }
}
