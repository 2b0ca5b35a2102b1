//! Peer-wire session: handshake, message framing, per-peer connection state.
//!
//! One [`session::PeerSession`] owns one TCP connection to one remote peer.
//! It speaks BEP 3 end to end (handshake, then length-prefixed messages) and
//! reports block arrivals and lifecycle changes to the coordinator over an
//! event channel rather than calling back into it directly.
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

pub use handshake::Handshake;
pub use message::Message;
pub use session::{PeerCommand, PeerEvent, PeerSession};

/// Session-fatal errors. None of these are run-fatal: the coordinator drops
/// the offending session and continues with whatever peers remain.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("handshake failed: invalid protocol identifier")]
    InvalidProtocol,

    #[error("handshake failed: info-hash mismatch")]
    InfoHashMismatch,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
