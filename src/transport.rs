//! The QUIC transport abstraction the engine is driven by and writes back
//! to. QUIC itself — congestion control, TLS, packetization, loss recovery —
//! is explicitly out of scope (spec Section 1); this module only fixes the
//! shape of the capability the engine consumes.
//!
//! Grounded on the poll-based `Connection`/`SendStream`/`RecvStream`/
//! `OpenStreams` trait set vendored for an HTTP/3-over-QUIC crate in the
//! retrieval pack, adapted to spec Section 4.8's event-enum delivery model:
//! rather than the engine polling the transport, the transport pushes
//! [`Event`]s to the engine over a channel and the engine calls back through
//! [`TransportHandle`] to open streams, write bytes, and signal resets.

use bytes::Bytes;

use crate::error::Code;

/// An opaque token identifying one outstanding write, handed back to the
/// engine on the matching `SendComplete` event so the engine can release the
/// buffer it allocated for that write (spec Section 5, "send buffers...
/// their lifetime is tied to the send operation, not to the stream").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendToken(pub u64);

/// Events the transport delivers to the engine for one connection. The
/// transport constructs these and sends them over a channel; the engine
/// dispatches purely on the discriminant (spec Section 9: "model as a
/// strongly-typed event enum delivered over a channel").
#[derive(Debug, Clone)]
pub enum Event {
    /// The QUIC handshake completed and the connection is ready for use.
    ConnectionEstablished,
    /// The connection was torn down, locally or by the peer.
    ConnectionClosed,
    /// A previously issued write identified by `token` has left the
    /// transport's send buffer and may be released.
    SendComplete { token: SendToken },
    /// Bytes arrived on `stream_id`, more may follow.
    Receive { stream_id: u64, data: Bytes },
    /// The final bytes arrived on `stream_id`; the peer will send no more.
    ReceiveFin { stream_id: u64, data: Bytes },
    /// The peer reset `stream_id` with the given application error code.
    StreamReset { stream_id: u64, code: Code },
    /// The peer asked the engine to stop sending on `stream_id`.
    StopSending { stream_id: u64, code: Code },
}

/// The operations the engine performs against an established connection.
/// Implemented once per real QUIC stack (or, for tests, over in-memory
/// channels); the engine only ever holds `Arc<dyn TransportHandle>`.
pub trait TransportHandle: Send + Sync {
    /// Opens a new unidirectional stream and returns its id.
    fn open_uni_stream(&self) -> crate::error::Result<u64>;

    /// Opens a new bidirectional stream and returns its id (client engine
    /// use; a server never initiates a request stream).
    fn open_bidi_stream(&self) -> crate::error::Result<u64>;

    /// Queues `data` for `stream_id`. If `fin` is set, no further bytes will
    /// be sent on this stream. Returns a token redeemed by a later
    /// `SendComplete` event.
    fn write(&self, stream_id: u64, data: Bytes, fin: bool) -> crate::error::Result<SendToken>;

    /// Resets the send side of `stream_id` with the given application error
    /// code (used for peer-cancelled and server-cancelled streams alike).
    fn reset_stream(&self, stream_id: u64, code: Code);

    /// Signals the peer to stop sending on `stream_id`.
    fn stop_sending(&self, stream_id: u64, code: Code);

    /// Closes the whole connection with the given HTTP/3 error code.
    fn close_connection(&self, code: Code, reason: &str);
}

/// Derives a stream's direction from the low bit of its id (Section 2.1 of
/// RFC 9000: bit 0x1 set ⇒ unidirectional).
pub fn is_bidirectional(stream_id: u64) -> bool {
    stream_id & 0x2 == 0
}

/// True iff `stream_id` was opened by the client (RFC 9000 Section 2.1: bit
/// 0x1 clear ⇒ client-initiated).
pub fn is_client_initiated(stream_id: u64) -> bool {
    stream_id & 0x1 == 0
}
