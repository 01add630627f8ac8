use crate::version::ProtocolVersion;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The message's declared protocol version does not match the
    /// encoder's own.
    #[error("protocol version mismatch: encoder speaks {ours}, message declares {theirs}")]
    VersionMismatch {
        ours: ProtocolVersion,
        theirs: ProtocolVersion,
    },

    /// Wire bytes do not form a valid message in this encoding.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A reader quota was exceeded while decoding.
    #[error("{quota} quota exceeded ({actual} bytes, max {limit})")]
    QuotaExceeded {
        quota: &'static str,
        limit: usize,
        actual: usize,
    },

    /// The serialized message exceeds the caller's size bound.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// An I/O error occurred on the encode or decode stream.
    #[error("encoding I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EncodingError>;
