//! In-memory [`TransportHandle`] double used by the end-to-end scenario
//! tests, standing in for a real QUIC stack.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use h3engine::{Code, Error, SendToken, TransportHandle};

pub struct MockTransport {
    next_uni: AtomicU64,
    next_bidi: AtomicU64,
    pub writes: Mutex<Vec<(u64, Bytes, bool)>>,
    pub resets: Mutex<Vec<(u64, Code)>>,
    pub stop_sent: Mutex<Vec<(u64, Code)>>,
    pub closed: Mutex<Option<Code>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            next_uni: AtomicU64::new(2),
            next_bidi: AtomicU64::new(0),
            writes: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
            stop_sent: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
        }
    }

    /// Concatenates every chunk written to `stream_id`, in write order.
    pub fn written_to(&self, stream_id: u64) -> Vec<u8> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == stream_id)
            .flat_map(|(_, data, _)| data.to_vec())
            .collect()
    }

    pub fn fin_seen_on(&self, stream_id: u64) -> bool {
        self.writes.lock().unwrap().iter().any(|(id, _, fin)| *id == stream_id && *fin)
    }
}

impl TransportHandle for MockTransport {
    fn open_uni_stream(&self) -> Result<u64, Error> {
        Ok(self.next_uni.fetch_add(4, Ordering::SeqCst))
    }

    fn open_bidi_stream(&self) -> Result<u64, Error> {
        Ok(self.next_bidi.fetch_add(4, Ordering::SeqCst))
    }

    fn write(&self, stream_id: u64, data: Bytes, fin: bool) -> Result<SendToken, Error> {
        self.writes.lock().unwrap().push((stream_id, data, fin));
        Ok(SendToken(0))
    }

    fn reset_stream(&self, stream_id: u64, code: Code) {
        self.resets.lock().unwrap().push((stream_id, code));
    }

    fn stop_sending(&self, stream_id: u64, code: Code) {
        self.stop_sent.lock().unwrap().push((stream_id, code));
    }

    fn close_connection(&self, code: Code, _reason: &str) {
        *self.closed.lock().unwrap() = Some(code);
    }
}

pub fn get_request(path: &str) -> Vec<u8> {
    let encoded = h3engine::qpack::encode([
        (":method", "GET"),
        (":scheme", "https"),
        (":authority", "localhost:4433"),
        (":path", path),
    ]);
    h3engine::frame::build_frame(h3engine::frame::TYPE_HEADERS, &encoded)
}

pub fn post_request(path: &str, body: &[u8]) -> Vec<u8> {
    let encoded = h3engine::qpack::encode([
        (":method", "POST"),
        (":scheme", "https"),
        (":authority", "localhost:4433"),
        (":path", path),
    ]);
    let mut buf = h3engine::frame::build_frame(h3engine::frame::TYPE_HEADERS, &encoded);
    buf.extend(h3engine::frame::build_frame(h3engine::frame::TYPE_DATA, body));
    buf
}
