//! Per-QUIC-connection registry of streams, control/QPACK stream handles,
//! and the per-connection state machine (spec Sections 4.7 and 4.11).
//!
//! Grounded on the concurrent `DashMap`-backed stream map pattern used
//! throughout the teacher's stream coordinator, generalized from an HTTP/2
//! stream table to HTTP/3's request/control/QPACK stream split, plus the
//! `SharedState`/closing-id bookkeeping of the pack's vendored HTTP/3
//! connection module ("a second control stream is a fatal connection
//! error").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use log::{debug, trace, warn};

use crate::error::{Code, Error};
use crate::frame::{self, STREAM_TYPE_CONTROL, STREAM_TYPE_QPACK_DECODER, STREAM_TYPE_QPACK_ENCODER};
use crate::stream::{Role, Stream};
use crate::transport::TransportHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Active,
    Draining,
    Closed,
}

/// Tracks which unidirectional "critical" streams the peer has opened, so a
/// second one of any kind can be rejected as a fatal connection error.
struct UnidirectionalStreams {
    peer_control: Option<u64>,
    peer_qpack_encoder: Option<u64>,
    peer_qpack_decoder: Option<u64>,
    /// True once the peer's control stream has delivered its mandatory
    /// leading SETTINGS frame (Section 7.2.4.1).
    peer_settings_seen: bool,
}

impl UnidirectionalStreams {
    fn new() -> Self {
        UnidirectionalStreams {
            peer_control: None,
            peer_qpack_encoder: None,
            peer_qpack_decoder: None,
            peer_settings_seen: false,
        }
    }
}

pub struct Connection {
    pub id: u64,
    transport: Arc<dyn TransportHandle>,
    streams: DashMap<u64, Stream>,
    /// Undispatched bytes for unidirectional streams, kept separate from
    /// request-stream accumulators since control-stream frames are parsed
    /// incrementally rather than only at FIN.
    unidirectional_buffers: DashMap<u64, Vec<u8>>,
    /// Remembers each unidirectional stream's role after its first byte is
    /// classified, so later chunks on the same stream aren't mistaken for a
    /// fresh type byte.
    unidirectional_roles: DashMap<u64, Role>,
    unidirectional: Mutex<UnidirectionalStreams>,
    our_control_stream_id: Mutex<Option<u64>>,
    state: Mutex<ConnectionState>,
    goaway_sent: AtomicBool,
}

impl Connection {
    pub fn new(id: u64, transport: Arc<dyn TransportHandle>) -> Self {
        Connection {
            id,
            transport,
            streams: DashMap::new(),
            unidirectional_buffers: DashMap::new(),
            unidirectional_roles: DashMap::new(),
            unidirectional: Mutex::new(UnidirectionalStreams::new()),
            our_control_stream_id: Mutex::new(None),
            state: Mutex::new(ConnectionState::New),
            goaway_sent: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state lock")
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock().expect("connection state lock");
        if *state != next {
            trace!("connection {} {:?} -> {:?}", self.id, *state, next);
            *state = next;
        }
    }

    /// Opens our outbound control stream and writes the prelude. Transitions
    /// New -> Active.
    pub fn mark_established(&self) -> Result<(), Error> {
        let stream_id = self.transport.open_uni_stream()?;
        self.transport
            .write(stream_id, Bytes::from(frame::control_stream_prelude()), false)?;
        *self.our_control_stream_id.lock().expect("control stream id lock") = Some(stream_id);
        self.transition(ConnectionState::Active);
        Ok(())
    }

    pub fn mark_closed(&self) {
        self.transition(ConnectionState::Closed);
        self.streams.clear();
        self.unidirectional_buffers.clear();
    }

    /// Gets or creates the request-stream entry for `stream_id`. A stream is
    /// only ever created here the moment it's revealed by its first inbound
    /// frame (or opened by this endpoint), so it's bound to this
    /// connection's transport handle immediately — there is one handle per
    /// connection, parameterized by stream id on every write.
    pub fn stream_mut(&self, stream_id: u64) -> RefMut<'_, u64, Stream> {
        self.streams.entry(stream_id).or_insert_with(|| {
            let mut stream = Stream::new(stream_id);
            stream.bind_handle(self.transport.clone());
            stream
        })
    }

    pub fn remove_stream(&self, stream_id: u64) {
        self.streams.remove(&stream_id);
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Classifies a newly observed unidirectional stream by its first byte
    /// (Section 6.2). A second control, QPACK-encoder, or QPACK-decoder
    /// stream from the peer is a fatal connection error.
    pub fn record_unidirectional_type(&self, stream_id: u64, type_byte: u8) -> Result<Role, Error> {
        let mut tracked = self.unidirectional.lock().expect("unidirectional lock");
        let role = match type_byte {
            STREAM_TYPE_CONTROL => {
                if tracked.peer_control.is_some() {
                    return Err(Error::connection_fatal(
                        Code::H3_STREAM_CREATION_ERROR,
                        "second peer control stream",
                    ));
                }
                tracked.peer_control = Some(stream_id);
                Role::Control
            }
            STREAM_TYPE_QPACK_ENCODER => {
                if tracked.peer_qpack_encoder.is_some() {
                    return Err(Error::connection_fatal(
                        Code::H3_STREAM_CREATION_ERROR,
                        "second peer QPACK encoder stream",
                    ));
                }
                tracked.peer_qpack_encoder = Some(stream_id);
                Role::QpackEncoder
            }
            STREAM_TYPE_QPACK_DECODER => {
                if tracked.peer_qpack_decoder.is_some() {
                    return Err(Error::connection_fatal(
                        Code::H3_STREAM_CREATION_ERROR,
                        "second peer QPACK decoder stream",
                    ));
                }
                tracked.peer_qpack_decoder = Some(stream_id);
                Role::QpackDecoder
            }
            other => {
                trace!("connection {} ignoring unknown unidirectional stream type {:#x}", self.id, other);
                Role::Unknown
            }
        };
        Ok(role)
    }

    /// Returns the role of `stream_id`, classifying it from the leading byte
    /// of `first_chunk` if this is the first time bytes arrived on it.
    /// Returns `(role, bytes_consumed_as_type_byte)`; `bytes_consumed` is 0
    /// once the stream has already been classified.
    pub fn unidirectional_role(&self, stream_id: u64, first_chunk: &[u8]) -> Result<(Role, usize), Error> {
        if let Some(role) = self.unidirectional_roles.get(&stream_id) {
            return Ok((*role, 0));
        }
        let Some(&type_byte) = first_chunk.first() else {
            return Ok((Role::Unknown, 0));
        };
        let role = self.record_unidirectional_type(stream_id, type_byte)?;
        self.unidirectional_roles.insert(stream_id, role);
        Ok((role, 1))
    }

    pub fn forget_unidirectional(&self, stream_id: u64) {
        self.unidirectional_roles.remove(&stream_id);
        self.unidirectional_buffers.remove(&stream_id);
    }

    /// Feeds bytes received on a unidirectional stream whose role has
    /// already been recorded via [`Self::record_unidirectional_type`].
    /// Control-stream frames are parsed as soon as enough bytes accumulate;
    /// QPACK encoder/decoder streams are recorded but not parsed (no dynamic
    /// table); unknown streams are drained and discarded per RFC 9114
    /// Section 9, not silently dropped unread.
    pub fn feed_unidirectional(&self, stream_id: u64, role: Role, chunk: &[u8]) -> Result<(), Error> {
        match role {
            Role::Control => self.feed_control_stream(stream_id, chunk),
            Role::QpackEncoder | Role::QpackDecoder => {
                // No dynamic table support: bytes are drained, not parsed.
                Ok(())
            }
            Role::Unknown => {
                trace!("connection {} draining {} bytes from unknown stream {}", self.id, chunk.len(), stream_id);
                Ok(())
            }
            Role::Request => unreachable!("request streams are bidirectional"),
        }
    }

    fn feed_control_stream(&self, stream_id: u64, chunk: &[u8]) -> Result<(), Error> {
        let mut buf = self.unidirectional_buffers.entry(stream_id).or_default();
        buf.extend_from_slice(chunk);

        let (frames, consumed) = frame::parse_frames(&buf);
        for f in &frames {
            let mut tracked = self.unidirectional.lock().expect("unidirectional lock");
            if !tracked.peer_settings_seen {
                if f.frame_type != frame::TYPE_SETTINGS {
                    return Err(Error::connection_fatal(Code::H3_MISSING_SETTINGS, "control stream frame before SETTINGS"));
                }
                tracked.peer_settings_seen = true;
                debug!("connection {} received peer SETTINGS", self.id);
                continue;
            }
            drop(tracked);

            match f.frame_type {
                frame::TYPE_SETTINGS => {
                    warn!("connection {} received duplicate SETTINGS frame", self.id);
                }
                frame::TYPE_GOAWAY => {
                    if let Some(last) = frame::decode_goaway(&f.payload) {
                        debug!("connection {} received peer GOAWAY(last_stream={})", self.id, last);
                    }
                }
                frame::TYPE_CANCEL_PUSH | frame::TYPE_MAX_PUSH_ID => {
                    // Server push is not implemented; accept and ignore.
                }
                other if !frame::CONTROL_ONLY_TYPES.contains(&other) && other != frame::TYPE_SETTINGS && other != frame::TYPE_GOAWAY => {
                    return Err(Error::connection_fatal(Code::H3_FRAME_UNEXPECTED, "unexpected frame on control stream"));
                }
                _ => {}
            }
        }
        buf.drain(..consumed);
        Ok(())
    }

    /// Sends a GOAWAY on our outbound control stream and transitions
    /// Active -> Draining. A no-op if GOAWAY was already sent.
    pub fn send_goaway(&self, stream_id: u64) -> Result<(), Error> {
        if self.goaway_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let control_stream_id = self
            .our_control_stream_id
            .lock()
            .expect("control stream id lock")
            .ok_or_else(|| Error::connection_fatal(Code::H3_INTERNAL_ERROR, "no outbound control stream"))?;
        self.transport
            .write(control_stream_id, Bytes::from(frame::build_goaway(stream_id)), false)?;
        self.transition(ConnectionState::Draining);
        Ok(())
    }

    pub fn transport(&self) -> &Arc<dyn TransportHandle> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorLevel, Result as EngineResult};
    use std::sync::atomic::AtomicU64;

    struct FakeTransport {
        next_uni: AtomicU64,
        next_token: AtomicU64,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport {
                next_uni: AtomicU64::new(2),
                next_token: AtomicU64::new(0),
            }
        }
    }

    impl TransportHandle for FakeTransport {
        fn open_uni_stream(&self) -> EngineResult<u64> {
            Ok(self.next_uni.fetch_add(4, Ordering::SeqCst))
        }
        fn open_bidi_stream(&self) -> EngineResult<u64> {
            Ok(0)
        }
        fn write(&self, _stream_id: u64, _data: Bytes, _fin: bool) -> EngineResult<crate::transport::SendToken> {
            Ok(crate::transport::SendToken(self.next_token.fetch_add(1, Ordering::SeqCst)))
        }
        fn reset_stream(&self, _stream_id: u64, _code: Code) {}
        fn stop_sending(&self, _stream_id: u64, _code: Code) {}
        fn close_connection(&self, _code: Code, _reason: &str) {}
    }

    fn new_connection() -> Connection {
        Connection::new(1, Arc::new(FakeTransport::new()))
    }

    #[test]
    fn establishing_opens_a_control_stream_and_transitions_active() {
        let conn = new_connection();
        assert_eq!(conn.state(), ConnectionState::New);
        conn.mark_established().unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn a_second_peer_control_stream_is_fatal() {
        let conn = new_connection();
        conn.record_unidirectional_type(3, STREAM_TYPE_CONTROL).unwrap();
        let err = conn.record_unidirectional_type(7, STREAM_TYPE_CONTROL).unwrap_err();
        assert_eq!(err.level, ErrorLevel::Connection);
    }

    #[test]
    fn unknown_stream_types_are_accepted_and_drained() {
        let conn = new_connection();
        let role = conn.record_unidirectional_type(11, 0x41).unwrap();
        assert_eq!(role, Role::Unknown);
        conn.feed_unidirectional(11, role, b"grease bytes").unwrap();
    }

    #[test]
    fn control_stream_requires_settings_first() {
        let conn = new_connection();
        let role = conn.record_unidirectional_type(3, STREAM_TYPE_CONTROL).unwrap();
        let goaway = frame::build_goaway(0);
        let err = conn.feed_unidirectional(3, role, &goaway).unwrap_err();
        assert_eq!(err.level, ErrorLevel::Connection);
    }

    #[test]
    fn control_stream_accepts_settings_then_goaway() {
        let conn = new_connection();
        let role = conn.record_unidirectional_type(3, STREAM_TYPE_CONTROL).unwrap();
        let mut buf = frame::build_frame(frame::TYPE_SETTINGS, &[]);
        buf.extend(frame::build_goaway(4));
        conn.feed_unidirectional(3, role, &buf).unwrap();
    }

    #[test]
    fn send_goaway_is_idempotent_and_transitions_draining() {
        let conn = new_connection();
        conn.mark_established().unwrap();
        conn.send_goaway(frame::GOAWAY_SENTINEL).unwrap();
        assert_eq!(conn.state(), ConnectionState::Draining);
        conn.send_goaway(frame::GOAWAY_SENTINEL).unwrap();
    }

    #[test]
    fn stream_mut_creates_on_first_access_and_remove_stream_clears_it() {
        let conn = new_connection();
        {
            let mut s = conn.stream_mut(0);
            s.buffer_data(b"abc");
        }
        assert_eq!(conn.stream_count(), 1);
        conn.remove_stream(0);
        assert_eq!(conn.stream_count(), 0);
    }

    #[test]
    fn unidirectional_role_classifies_once_then_remembers() {
        let conn = new_connection();
        let (role, consumed) = conn.unidirectional_role(9, &[STREAM_TYPE_QPACK_ENCODER, 0xAA]).unwrap();
        assert_eq!(role, Role::QpackEncoder);
        assert_eq!(consumed, 1);
        let (role2, consumed2) = conn.unidirectional_role(9, &[0xBB]).unwrap();
        assert_eq!(role2, Role::QpackEncoder);
        assert_eq!(consumed2, 0);
    }

    #[test]
    fn mark_closed_clears_all_streams() {
        let conn = new_connection();
        conn.stream_mut(0).buffer_data(b"x");
        conn.stream_mut(4).buffer_data(b"y");
        conn.mark_closed();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.stream_count(), 0);
    }
}
