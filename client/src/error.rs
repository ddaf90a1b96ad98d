//! Error taxonomy of a lobby session.
//!
//! Errors fall in four groups:
//! - transport closed (end of stream, reset, explicit close), expected during
//!   teardown and never worth an error log
//! - protocol violations, which end the affected connection only
//! - handshake rejections from peers, which end one connection attempt
//! - host rejection at join time, which ends the whole session

use protocol::{ProtocolError, RejectReason};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("timeout")]
    Timeout,

    #[error("connection closed")]
    Closed,

    /// Host answered the join request with something other than a slot
    /// table or a rejection.
    #[error("unexpected packet {0:#04x}")]
    UnexpectedPacket(u8),

    #[error("first packet on peer connection is not a handshake")]
    InvalidFirstPacket,

    #[error("unknown peer id {0}")]
    UnknownPeerId(u8),

    #[error("peer already connected")]
    AlreadyConnected,

    #[error("invalid entry key")]
    InvalidEntryKey,

    #[error("invalid join counter")]
    InvalidJoinCounter,

    #[error("join rejected: {0}")]
    JoinRejected(RejectReason),

    #[error("no game found")]
    NoGameFound,
}

impl SessionError {
    /// Whether this error only signals that the connection went away.
    pub fn is_closed(&self) -> bool {
        match self {
            SessionError::Closed => true,
            SessionError::Io(e) => is_closed_io(e),
            SessionError::Protocol(ProtocolError::Io(e)) => is_closed_io(e),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout)
    }
}

fn is_closed_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
