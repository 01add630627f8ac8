use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use wirechan_transport::NetStream;

use crate::error::{FramingError, Result};
use crate::reader::transport_to_framing_error;
use crate::record::{encode_record, Record};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete records to any `Write` stream.
pub struct RecordWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> RecordWriter<T> {
    /// Create a new record writer.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode and write a record, then flush (blocking).
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.stage_record(record)?;
        self.flush_staged()
    }

    /// Encode a record into the staging buffer without writing it yet.
    ///
    /// Lets a preamble or a chunk run go out in one write.
    pub fn stage_record(&mut self, record: &Record) -> Result<()> {
        encode_record(record, &mut self.buf)
    }

    /// Write out everything staged and flush the stream.
    pub fn flush_staged(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => {
                    self.buf.clear();
                    return Err(FramingError::ConnectionClosed);
                }
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.buf.clear();
                    return Err(FramingError::Io(err));
                }
            }
        }
        self.buf.clear();

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FramingError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl RecordWriter<NetStream> {
    /// Create a record writer over a [`NetStream`], applying a write timeout.
    pub fn with_timeout(
        inner: NetStream,
        timeout: Option<std::time::Duration>,
    ) -> Result<Self> {
        inner
            .set_write_timeout(timeout)
            .map_err(transport_to_framing_error)?;
        Ok(Self::new(inner))
    }
}
