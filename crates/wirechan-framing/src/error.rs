/// Errors that can occur in the framing protocol.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// An unknown record kind byte was read from the stream.
    #[error("unknown record kind 0x{0:02x}")]
    UnknownRecord(u8),

    /// A record arrived out of order for the current protocol phase.
    #[error("unexpected {found} record while expecting {expected}")]
    UnexpectedRecord {
        expected: &'static str,
        found: &'static str,
    },

    /// The peer speaks an incompatible framing protocol version.
    #[error("unsupported framing version {major}.{minor} (ours {ours_major}.{ours_minor})")]
    UnsupportedVersion {
        major: u8,
        minor: u8,
        ours_major: u8,
        ours_minor: u8,
    },

    /// A known-encoding record carries a code this implementation
    /// does not recognize.
    #[error("unknown encoding code 0x{0:02x}")]
    UnknownEncoding(u8),

    /// A required preamble field was left empty.
    #[error("preamble {field} must not be empty")]
    EmptyPreambleField { field: &'static str },

    /// The acceptor rejected the preamble; reason as sent in the fault record.
    #[error("peer faulted the connection: {0}")]
    Fault(String),

    /// A record payload exceeds the configured maximum size.
    #[error("record payload too large ({size} bytes, max {max})")]
    RecordTooLarge { size: usize, max: usize },

    /// An accumulated message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A record string payload is not valid UTF-8.
    #[error("record payload is not valid UTF-8")]
    InvalidUtf8,

    /// An operation was attempted in the wrong connection state.
    #[error("cannot {operation} in framing state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: crate::engine::FramingState,
    },

    /// The connection was closed before a complete record was received.
    #[error("connection closed (incomplete record)")]
    ConnectionClosed,

    /// An I/O error occurred while reading or writing records.
    #[error("framing I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// True when the failure is the peer or the pipe going away, as
    /// opposed to a protocol violation.
    pub fn is_communication(&self) -> bool {
        matches!(self, FramingError::ConnectionClosed | FramingError::Io(_))
    }

    /// True when the underlying I/O failure is a read/write deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FramingError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, FramingError>;
