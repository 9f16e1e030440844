//! Per-stream identity, direction, accumulation buffer, and the per-stream
//! state machine (spec Sections 4.7 and 4.11).

use std::sync::Arc;

use log::trace;

use crate::transport::{is_bidirectional, is_client_initiated, TransportHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bidirectional,
    Unidirectional,
}

/// What a stream is for, known from its id's parity (bidirectional) or from
/// the first byte received on it (unidirectional).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Request,
    Control,
    QpackEncoder,
    QpackDecoder,
    Unknown,
}

/// The request-stream lifecycle (spec Section 4.11). Control and QPACK
/// streams don't carry this state machine; they're tracked only by
/// [`crate::connection::Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Receiving,
    HeadersSeen,
    BodyReceiving,
    AwaitingDispatch,
    Dispatched,
    Responded,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Responded | StreamState::Cancelled)
    }
}

pub struct Stream {
    pub id: u64,
    pub direction: Direction,
    pub role: Role,
    pub state: StreamState,
    accumulator: Vec<u8>,
    handle: Option<Arc<dyn TransportHandle>>,
}

impl Stream {
    pub fn new(id: u64) -> Self {
        Stream {
            id,
            direction: if is_bidirectional(id) {
                Direction::Bidirectional
            } else {
                Direction::Unidirectional
            },
            role: if is_bidirectional(id) { Role::Request } else { Role::Unknown },
            state: StreamState::Idle,
            accumulator: Vec::new(),
            handle: None,
        }
    }

    pub fn is_client_initiated(&self) -> bool {
        is_client_initiated(self.id)
    }

    /// True iff a transport handle has been bound, i.e. writes on this
    /// stream are possible (spec Section 4.7, "ready to send").
    pub fn ready_to_send(&self) -> bool {
        self.handle.is_some()
    }

    pub fn bind_handle(&mut self, handle: Arc<dyn TransportHandle>) {
        self.handle = Some(handle);
    }

    pub fn handle(&self) -> Option<&Arc<dyn TransportHandle>> {
        self.handle.as_ref()
    }

    /// Appends a received chunk to this stream's accumulator.
    pub fn buffer_data(&mut self, chunk: &[u8]) {
        if self.state == StreamState::Idle {
            self.transition(StreamState::Receiving);
        }
        self.accumulator.extend_from_slice(chunk);
    }

    /// Appends the final chunk and returns the complete accumulated byte
    /// sequence, removing it from the stream (spec Section 4.7:
    /// `complete_stream` "returns the full byte sequence and removes the
    /// accumulator").
    pub fn complete(&mut self, tail_chunk: &[u8]) -> Vec<u8> {
        self.accumulator.extend_from_slice(tail_chunk);
        if !self.state.is_terminal() {
            self.transition(StreamState::AwaitingDispatch);
        }
        std::mem::take(&mut self.accumulator)
    }

    /// Marks this stream's headers/body progress, used by callers that parse
    /// frames incrementally rather than only at FIN (reserved for streaming
    /// transports; the current worker path parses only at FIN).
    pub fn note_headers_seen(&mut self) {
        if self.state == StreamState::Receiving {
            self.transition(StreamState::HeadersSeen);
        }
    }

    pub fn note_body_chunk_seen(&mut self) {
        if matches!(self.state, StreamState::HeadersSeen) {
            self.transition(StreamState::BodyReceiving);
        }
    }

    pub fn mark_dispatched(&mut self) {
        self.transition(StreamState::Dispatched);
    }

    pub fn mark_responded(&mut self) {
        self.transition(StreamState::Responded);
    }

    pub fn mark_cancelled(&mut self) {
        self.transition(StreamState::Cancelled);
    }

    fn transition(&mut self, next: StreamState) {
        if self.state != next {
            trace!("stream {} {:?} -> {:?}", self.id, self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_and_role_derive_from_id_parity() {
        let bidi = Stream::new(0);
        assert_eq!(bidi.direction, Direction::Bidirectional);
        assert_eq!(bidi.role, Role::Request);

        let uni = Stream::new(2);
        assert_eq!(uni.direction, Direction::Unidirectional);
        assert_eq!(uni.role, Role::Unknown);
    }

    #[test]
    fn not_ready_to_send_until_handle_bound() {
        let s = Stream::new(0);
        assert!(!s.ready_to_send());
    }

    #[test]
    fn buffer_and_complete_round_trip_bytes_in_order() {
        let mut s = Stream::new(0);
        s.buffer_data(b"hello ");
        s.buffer_data(b"wor");
        let full = s.complete(b"ld");
        assert_eq!(full, b"hello world");
    }

    #[test]
    fn complete_clears_the_accumulator() {
        let mut s = Stream::new(0);
        s.buffer_data(b"abc");
        let _ = s.complete(b"");
        assert_eq!(s.complete(b""), Vec::<u8>::new());
    }

    #[test]
    fn state_machine_follows_the_spec_diagram() {
        let mut s = Stream::new(0);
        assert_eq!(s.state, StreamState::Idle);
        s.buffer_data(b"x");
        assert_eq!(s.state, StreamState::Receiving);
        s.note_headers_seen();
        assert_eq!(s.state, StreamState::HeadersSeen);
        s.note_body_chunk_seen();
        assert_eq!(s.state, StreamState::BodyReceiving);
        let _ = s.complete(b"");
        assert_eq!(s.state, StreamState::AwaitingDispatch);
        s.mark_dispatched();
        assert_eq!(s.state, StreamState::Dispatched);
        s.mark_responded();
        assert_eq!(s.state, StreamState::Responded);
        assert!(s.state.is_terminal());
    }

    #[test]
    fn cancellation_is_terminal_from_any_state() {
        let mut s = Stream::new(0);
        s.mark_cancelled();
        assert_eq!(s.state, StreamState::Cancelled);
        assert!(s.state.is_terminal());
    }
}
