//! Error taxonomy for the HTTP/3 engine.
//!
//! Every error a caller can observe is one of the five classes from the
//! engine's failure design: a [`Code`] names the wire-level HTTP/3 error
//! (RFC 9114 Section 8.1) attached where one applies.

use std::fmt;

/// An HTTP/3 error code, as sent in `RESET_STREAM`, `STOP_SENDING`, `GOAWAY`-adjacent
/// connection closes, and QUIC CONNECTION_CLOSE frames.
///
/// https://www.rfc-editor.org/rfc/rfc9114#section-8.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u64);

impl Code {
    pub const H3_NO_ERROR: Code = Code(0x100);
    pub const H3_GENERAL_PROTOCOL_ERROR: Code = Code(0x101);
    pub const H3_INTERNAL_ERROR: Code = Code(0x102);
    pub const H3_STREAM_CREATION_ERROR: Code = Code(0x103);
    pub const H3_CLOSED_CRITICAL_STREAM: Code = Code(0x104);
    pub const H3_FRAME_UNEXPECTED: Code = Code(0x105);
    pub const H3_FRAME_ERROR: Code = Code(0x106);
    pub const H3_EXCESSIVE_LOAD: Code = Code(0x107);
    pub const H3_ID_ERROR: Code = Code(0x108);
    pub const H3_SETTINGS_ERROR: Code = Code(0x109);
    pub const H3_MISSING_SETTINGS: Code = Code(0x10a);
    pub const H3_REQUEST_REJECTED: Code = Code(0x10b);
    pub const H3_REQUEST_CANCELLED: Code = Code(0x10c);
    pub const H3_REQUEST_INCOMPLETE: Code = Code(0x10d);
    pub const H3_MESSAGE_ERROR: Code = Code(0x10e);
    pub const H3_CONNECT_ERROR: Code = Code(0x10f);
    pub const QPACK_DECOMPRESSION_FAILED: Code = Code(0x200);

    pub fn with_reason(self, reason: impl Into<String>, level: ErrorLevel) -> Error {
        Error {
            code: Some(self),
            reason: reason.into(),
            level,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// The scope at which an [`Error`] was raised, used by callers to decide whether
/// to reply on a single stream or tear down the whole connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    /// Confined to a single stream; the connection survives.
    Stream,
    /// The connection must be closed with the attached [`Code`].
    Connection,
}

/// Top-level error type for the engine.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}{}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct Error {
    pub code: Option<Code>,
    pub reason: String,
    pub level: ErrorLevel,
}

impl Error {
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Code::H3_FRAME_UNEXPECTED.with_reason(reason, ErrorLevel::Stream)
    }

    pub fn qpack_decompression_failed(reason: impl Into<String>) -> Self {
        Code::QPACK_DECOMPRESSION_FAILED.with_reason(reason, ErrorLevel::Stream)
    }

    pub fn connection_fatal(code: Code, reason: impl Into<String>) -> Self {
        code.with_reason(reason, ErrorLevel::Connection)
    }

    pub fn is_connection_fatal(&self) -> bool {
        self.level == ErrorLevel::Connection
    }
}

/// Taxonomy discriminant for callers that want to branch on failure class
/// rather than match on [`Code`] directly (spec Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Bad frame order/type, malformed QPACK, missing pseudo-headers.
    ProtocolViolation,
    /// The application callback raised.
    ApplicationFailure,
    /// Queue or connection admission limits were reached.
    CapacityExceeded,
    /// RESET_STREAM or STOP_SENDING from the peer.
    PeerCancelled,
    /// A connection-scoped violation; the connection must close.
    ConnectionFatal,
}

impl Error {
    pub fn class(&self) -> FailureClass {
        match self.level {
            ErrorLevel::Connection => FailureClass::ConnectionFatal,
            ErrorLevel::Stream => match self.code {
                Some(Code::H3_EXCESSIVE_LOAD) | Some(Code::H3_REQUEST_REJECTED) => {
                    FailureClass::CapacityExceeded
                }
                Some(Code::H3_REQUEST_CANCELLED) => FailureClass::PeerCancelled,
                _ => FailureClass::ProtocolViolation,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
