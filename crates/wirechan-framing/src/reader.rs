use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use wirechan_transport::NetStream;

use crate::error::{FramingError, Result};
use crate::record::{decode_record, Record, DEFAULT_MAX_RECORD_PAYLOAD};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete records from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete records.
pub struct RecordReader<T> {
    inner: T,
    buf: BytesMut,
    max_record_payload: usize,
}

impl<T: Read> RecordReader<T> {
    /// Create a new record reader with the default payload bound.
    pub fn new(inner: T) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_RECORD_PAYLOAD)
    }

    /// Create a new record reader with an explicit payload bound.
    pub fn with_max_payload(inner: T, max_record_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_record_payload,
        }
    }

    /// Read the next complete record (blocking).
    ///
    /// Returns `Err(FramingError::ConnectionClosed)` when EOF is reached
    /// between records or mid-record.
    pub fn read_record(&mut self) -> Result<Record> {
        loop {
            if let Some(record) = decode_record(&mut self.buf, self.max_record_payload)? {
                return Ok(record);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FramingError::Io(err)),
            };

            if read == 0 {
                return Err(FramingError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Update the maximum record payload size for subsequent decoding.
    pub fn set_max_record_payload(&mut self, max: usize) {
        self.max_record_payload = max;
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    ///
    /// Any buffered-but-undecoded bytes are discarded; only call this at
    /// a record boundary.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl RecordReader<NetStream> {
    /// Create a record reader over a [`NetStream`], applying a read timeout.
    pub fn with_timeout(
        inner: NetStream,
        timeout: Option<std::time::Duration>,
    ) -> Result<Self> {
        inner
            .set_read_timeout(timeout)
            .map_err(transport_to_framing_error)?;
        Ok(Self::new(inner))
    }
}

pub(crate) fn transport_to_framing_error(
    err: wirechan_transport::TransportError,
) -> FramingError {
    match err {
        wirechan_transport::TransportError::Io(io)
        | wirechan_transport::TransportError::Accept(io) => FramingError::Io(io),
        wirechan_transport::TransportError::Bind { source, .. }
        | wirechan_transport::TransportError::Connect { source, .. } => FramingError::Io(source),
        other => FramingError::Io(std::io::Error::other(other.to_string())),
    }
}
