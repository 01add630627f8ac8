/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The via string could not be parsed into a transport address.
    #[error("invalid via '{via}': {reason}")]
    InvalidVia { via: String, reason: String },

    /// The via names a scheme this operation does not serve.
    #[error("via scheme {actual} does not match transport scheme {expected}")]
    SchemeMismatch {
        expected: crate::via::Scheme,
        actual: crate::via::Scheme,
    },

    /// Failed to bind to the specified via.
    #[error("failed to bind to {via}: {source}")]
    Bind { via: String, source: std::io::Error },

    /// Failed to connect to the specified via.
    #[error("failed to connect to {via}: {source}")]
    Connect { via: String, source: std::io::Error },

    /// Connection establishment did not complete within its allotted duration.
    #[error("connect to {via} timed out after {timeout:?}")]
    ConnectTimeout {
        via: String,
        timeout: std::time::Duration,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pipe path is too long for the platform.
    #[error("pipe path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: String,
        len: usize,
        max: usize,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
