//! Protocol-level error taxonomy.
//!
//! Every error a handler can surface maps to one of these kinds, and each
//! kind has a fixed disposition: close the session, answer on the request's
//! reply frame, or log and carry on. The session loop consults
//! [`ProtocolError::closes_session`] — nothing here ever aborts the process.

use crate::codec::DecodeError;
use crate::frame::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Undecodable frame or payload. Closes the session.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Endpoint used before authentication completed. Closes the session.
    #[error("endpoint requires authentication")]
    Unauthorized,

    /// Packet legal in general but not in the current state machine state.
    /// Closes the session.
    #[error("unexpected packet for current state: {0}")]
    UnexpectedState(String),

    /// Key cache could not resolve a key (remote/disk failure). The auth
    /// handler answers `TemporaryError`; the session stays open.
    #[error("key lookup failed: {0}")]
    KeyLookupFailed(String),

    /// The account service does not know this player id.
    #[error("unknown player id")]
    UnknownPlayer,

    /// Challenge signature did not verify.
    #[error("invalid challenge signature")]
    SignatureInvalid,

    /// World storage failed a request. Logged; the session continues.
    #[error("world storage unavailable: {0}")]
    StorageUnavailable(String),

    /// TLS or socket failure. Closes the session.
    #[error("connection error: {0}")]
    Connection(String),
}

impl ProtocolError {
    /// Whether this error terminates the session per the error policy.
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::Unauthorized | Self::UnexpectedState(_) | Self::Connection(_)
        )
    }
}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<FrameError> for ProtocolError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) => Self::Connection(io.to_string()),
            FrameError::ShortRead => Self::Connection("peer closed mid-frame".into()),
            other => Self::Malformed(other.to_string()),
        }
    }
}
