//! Client request engine: the mirror side of the server's message/response
//! codec pair, used to drive requests over the same [`TransportHandle`]
//! abstraction (spec Section 4.12).
//!
//! Grounded directly on the teacher's `client.rs`/`connection.rs`
//! `Connection::request` send-then-await-response flow, generalized from a
//! single blocking request (a `Condvar`-guarded response list) to a
//! cancellable async flow keyed by stream id, one `tokio::sync::oneshot`
//! channel per in-flight request. TLS/socket setup (the teacher's `rustls`
//! config and `Connection::connect`) is out of scope here: that lives in the
//! external QUIC transport this engine is handed, per spec Section 1.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::oneshot;

use crate::error::{Code, Error};
use crate::frame;
use crate::qpack;
use crate::transport::{Event, TransportHandle};

/// A request as the client engine sends it; mirrors [`crate::message::Request`]
/// but without a `query` field since the caller supplies a pre-joined path.
#[derive(Debug, Clone, Default)]
pub struct OutgoingRequest {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A response as the client engine receives it; mirrors
/// [`crate::response::Response`] but with a single flattened body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

const MAX_FIELD_SECTION_SIZE: u64 = 64 * 1024;

fn encode_request(request: &OutgoingRequest) -> Vec<u8> {
    let mut fields: Vec<(String, String)> = vec![
        (":method".to_string(), request.method.clone()),
        (":scheme".to_string(), request.scheme.clone()),
        (":authority".to_string(), request.authority.clone()),
        (":path".to_string(), request.path.clone()),
    ];
    for (name, value) in &request.headers {
        fields.push((name.to_ascii_lowercase(), value.clone()));
    }
    let refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let header_block = qpack::encode(refs);

    let mut out = frame::build_frame(frame::TYPE_HEADERS, &header_block);
    if !request.body.is_empty() {
        out.extend(frame::build_frame(frame::TYPE_DATA, &request.body));
    }
    out
}

fn decode_response(buf: &[u8]) -> Result<IncomingResponse, Error> {
    let (frames, consumed) = frame::parse_frames(buf);
    if consumed != buf.len() {
        return Err(Error::protocol_violation("trailing partial frame at FIN"));
    }
    let mut frames = frames.into_iter();
    let headers_frame = frames.next().ok_or_else(|| Error::protocol_violation("empty response stream"))?;
    if headers_frame.is_control_only() || headers_frame.frame_type != frame::TYPE_HEADERS {
        return Err(Error::protocol_violation("response stream did not start with HEADERS"));
    }

    let fields = qpack::decode(&headers_frame.payload, MAX_FIELD_SECTION_SIZE)
        .map_err(|e| Error::qpack_decompression_failed(e.to_string()))?;
    let mut fields = fields.into_iter();
    let (status_name, status_value) = fields.next().ok_or_else(|| Error::protocol_violation("missing :status"))?;
    if status_name != ":status" {
        return Err(Error::protocol_violation("first field was not :status"));
    }
    let status: u16 = status_value.parse().map_err(|_| Error::protocol_violation("non-numeric :status"))?;
    let headers: Vec<(String, String)> = fields.collect();

    let mut body = Vec::new();
    for f in frames {
        if f.is_control_only() {
            return Err(Error::protocol_violation("control-only frame on response stream"));
        }
        if f.frame_type == frame::TYPE_DATA {
            body.extend_from_slice(&f.payload);
        }
    }

    Ok(IncomingResponse { status, headers, body })
}

/// Drives requests over one connection's transport handle. Each
/// [`Self::send_request`] opens a fresh bidirectional stream and returns a
/// receiver that resolves once the full response (or a cancellation) has
/// arrived; events for this connection are fed in via [`Self::handle_event`].
pub struct ClientEngine {
    transport: Arc<dyn TransportHandle>,
    pending: DashMap<u64, oneshot::Sender<Result<IncomingResponse, Error>>>,
    accumulators: DashMap<u64, Vec<u8>>,
}

impl ClientEngine {
    pub fn new(transport: Arc<dyn TransportHandle>) -> Self {
        ClientEngine {
            transport,
            pending: DashMap::new(),
            accumulators: DashMap::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Opens a stream, writes the whole request with FIN, and returns a
    /// receiver for the eventual response. The request body is not
    /// streamed; the spec's "finite and one-shot" body iterable is assumed
    /// to already be fully materialized by the caller.
    pub fn send_request(&self, request: OutgoingRequest) -> Result<oneshot::Receiver<Result<IncomingResponse, Error>>, Error> {
        let stream_id = self.transport.open_bidi_stream()?;
        let bytes = encode_request(&request);
        self.transport.write(stream_id, Bytes::from(bytes), true)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(stream_id, tx);
        debug!("client: sent request on stream {stream_id}");
        Ok(rx)
    }

    /// Cancels an in-flight request: resets the stream and completes the
    /// pending receiver with an error instead of leaving it to drop silently.
    pub fn cancel(&self, stream_id: u64) {
        self.transport.reset_stream(stream_id, Code::H3_REQUEST_CANCELLED);
        self.accumulators.remove(&stream_id);
        if let Some((_, tx)) = self.pending.remove(&stream_id) {
            let _ = tx.send(Err(Code::H3_REQUEST_CANCELLED.with_reason("request cancelled locally", crate::error::ErrorLevel::Stream)));
        }
    }

    pub fn handle_event(&self, event: Event) {
        match event {
            Event::Receive { stream_id, data } => {
                self.accumulators.entry(stream_id).or_default().extend_from_slice(&data);
            }
            Event::ReceiveFin { stream_id, data } => {
                let mut buf = self.accumulators.remove(&stream_id).map(|(_, v)| v).unwrap_or_default();
                buf.extend_from_slice(&data);
                let result = decode_response(&buf);
                if let Some((_, tx)) = self.pending.remove(&stream_id) {
                    let _ = tx.send(result);
                } else {
                    warn!("client: response on stream {stream_id} with no pending request");
                }
            }
            Event::StreamReset { stream_id, code } => {
                self.accumulators.remove(&stream_id);
                if let Some((_, tx)) = self.pending.remove(&stream_id) {
                    let _ = tx.send(Err(code.with_reason("stream reset by peer", crate::error::ErrorLevel::Stream)));
                }
            }
            Event::StopSending { .. } | Event::SendComplete { .. } | Event::ConnectionEstablished | Event::ConnectionClosed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SendToken;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeTransport {
        next_stream: AtomicU64,
        writes: std::sync::Mutex<Vec<(u64, Bytes, bool)>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport { next_stream: AtomicU64::new(0), writes: std::sync::Mutex::new(Vec::new()) }
        }
    }

    impl TransportHandle for FakeTransport {
        fn open_uni_stream(&self) -> crate::error::Result<u64> {
            Ok(2)
        }
        fn open_bidi_stream(&self) -> crate::error::Result<u64> {
            Ok(self.next_stream.fetch_add(4, Ordering::SeqCst))
        }
        fn write(&self, stream_id: u64, data: Bytes, fin: bool) -> crate::error::Result<SendToken> {
            self.writes.lock().unwrap().push((stream_id, data, fin));
            Ok(SendToken(0))
        }
        fn reset_stream(&self, _stream_id: u64, _code: Code) {}
        fn stop_sending(&self, _stream_id: u64, _code: Code) {}
        fn close_connection(&self, _code: Code, _reason: &str) {}
    }

    fn response_bytes(status: u16, body: &[u8]) -> Bytes {
        let response = crate::response::Response::new(status, vec![("content-type".to_string(), "text/plain".to_string())], vec![body.to_vec()]);
        Bytes::from(crate::response::encode(&response))
    }

    #[tokio::test]
    async fn sends_a_request_and_resolves_on_fin() {
        let transport = Arc::new(FakeTransport::new());
        let engine = ClientEngine::new(transport.clone());

        let rx = engine
            .send_request(OutgoingRequest {
                method: "GET".to_string(),
                scheme: "https".to_string(),
                authority: "example.com".to_string(),
                path: "/".to_string(),
                headers: vec![],
                body: vec![],
            })
            .unwrap();

        assert_eq!(engine.pending_count(), 1);
        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let stream_id = writes[0].0;
        drop(writes);

        engine.handle_event(Event::ReceiveFin { stream_id, data: response_bytes(200, b"OK") });
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"OK");
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_resolves_the_pending_receiver_with_an_error() {
        let transport = Arc::new(FakeTransport::new());
        let engine = ClientEngine::new(transport);
        let rx = engine
            .send_request(OutgoingRequest { method: "GET".to_string(), scheme: "https".to_string(), authority: "a".to_string(), path: "/".to_string(), headers: vec![], body: vec![] })
            .unwrap();
        engine.cancel(0);
        assert!(rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn stream_reset_from_peer_resolves_with_an_error() {
        let transport = Arc::new(FakeTransport::new());
        let engine = ClientEngine::new(transport);
        let rx = engine
            .send_request(OutgoingRequest { method: "GET".to_string(), scheme: "https".to_string(), authority: "a".to_string(), path: "/".to_string(), headers: vec![], body: vec![] })
            .unwrap();
        engine.handle_event(Event::StreamReset { stream_id: 0, code: Code::H3_REQUEST_CANCELLED });
        assert!(rx.await.unwrap().is_err());
    }

    #[test]
    fn request_response_round_trip_through_the_wire_codec() {
        let request = OutgoingRequest {
            method: "POST".to_string(),
            scheme: "https".to_string(),
            authority: "example.com".to_string(),
            path: "/upload".to_string(),
            headers: vec![("x-custom".to_string(), "1".to_string())],
            body: b"payload".to_vec(),
        };
        let encoded = encode_request(&request);
        let assembled = crate::message::assemble(&encoded).unwrap();
        assert_eq!(assembled.method, "POST");
        assert_eq!(assembled.path, "/upload");
        assert_eq!(assembled.body, b"payload");

        let response_bytes = response_bytes(200, b"done");
        let decoded = decode_response(&response_bytes).unwrap();
        assert_eq!(decoded.status, 200);
        assert_eq!(decoded.body, b"done");
    }
}
