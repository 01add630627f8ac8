use wirechan_encoding::EncodingError;
use wirechan_framing::FramingError;
use wirechan_transport::TransportError;

/// Errors surfaced by the channel layer.
///
/// Lower-layer failures are folded into this taxonomy so callers can
/// react by category rather than by source crate: a [`Timeout`] or
/// [`Communication`] failure faults the channel, an
/// [`InvalidOperation`] leaves it intact.
///
/// [`Timeout`]: ChannelError::Timeout
/// [`Communication`]: ChannelError::Communication
/// [`InvalidOperation`]: ChannelError::InvalidOperation
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// An operation did not complete within its allotted duration.
    #[error("{0} timed out")]
    Timeout(String),

    /// The peer violated the framing or encoding contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The connection failed or the peer went away.
    #[error("communication failure: {0}")]
    Communication(String),

    /// The operation is not valid in the channel's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The requested capability is not provided by this stack.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The channel is faulted; only abort is permitted.
    #[error("channel faulted: {0}")]
    Faulted(String),
}

impl ChannelError {
    /// True when the failure should fault the channel it occurred on.
    pub fn faults_channel(&self) -> bool {
        matches!(
            self,
            ChannelError::Timeout(_)
                | ChannelError::Protocol(_)
                | ChannelError::Communication(_)
                | ChannelError::Faulted(_)
        )
    }
}

impl From<FramingError> for ChannelError {
    fn from(err: FramingError) -> Self {
        if err.is_timeout() {
            ChannelError::Timeout("framing I/O".into())
        } else if err.is_communication() {
            ChannelError::Communication(err.to_string())
        } else if let FramingError::Fault(reason) = err {
            ChannelError::Faulted(reason)
        } else {
            ChannelError::Protocol(err.to_string())
        }
    }
}

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectTimeout { .. } => ChannelError::Timeout(err.to_string()),
            TransportError::InvalidVia { .. }
            | TransportError::SchemeMismatch { .. }
            | TransportError::PathTooLong { .. } => ChannelError::InvalidOperation(err.to_string()),
            TransportError::Bind { .. }
            | TransportError::Connect { .. }
            | TransportError::Accept(_)
            | TransportError::Io(_) => ChannelError::Communication(err.to_string()),
        }
    }
}

impl From<EncodingError> for ChannelError {
    fn from(err: EncodingError) -> Self {
        match err {
            EncodingError::Io(inner) => ChannelError::Communication(inner.to_string()),
            other => ChannelError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_timeouts_classify_as_timeout() {
        let err = FramingError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(ChannelError::from(err), ChannelError::Timeout(_)));
    }

    #[test]
    fn framing_faults_carry_the_peer_reason() {
        let err = FramingError::Fault("no such via".into());
        match ChannelError::from(err) {
            ChannelError::Faulted(reason) => assert_eq!(reason, "no such via"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_via_is_invalid_operation_not_communication() {
        let err = TransportError::InvalidVia {
            via: "ftp://x".into(),
            reason: "unknown scheme".into(),
        };
        let converted = ChannelError::from(err);
        assert!(matches!(converted, ChannelError::InvalidOperation(_)));
        assert!(!converted.faults_channel());
    }

    #[test]
    fn encoding_violations_classify_as_protocol() {
        let err = EncodingError::Malformed("bad tag".into());
        assert!(matches!(ChannelError::from(err), ChannelError::Protocol(_)));
    }
}
