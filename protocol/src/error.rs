use thiserror::Error;

/// Errors produced while framing, encoding or decoding packets.
///
/// All of these are local to a single frame: a caller that hits one of them
/// should drop the affected connection, never the whole process.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame does not start with the protocol signature byte, or is too short
    /// to carry a header at all.
    #[error("missing protocol signature")]
    NoProtocolSignature,

    /// Frame header or payload content cannot be interpreted.
    #[error("malformed data")]
    MalformedData,

    /// Payload is shorter than its fields require, or has trailing bytes.
    #[error("invalid packet size")]
    InvalidPacketSize,

    /// A value does not fit the size field it is encoded with.
    #[error("value does not fit its size field")]
    WrongSize,

    /// A checksummed field does not match the data it covers.
    #[error("invalid checksum")]
    InvalidChecksum,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;
