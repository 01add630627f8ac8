//! The per-connection framing engine.
//!
//! Owns the raw stream exclusively while a handshake or a message
//! transfer is in progress and enforces the protocol phase ordering:
//! `Unstarted → PreambleSent → PreambleAcked → Streaming → Ended`.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;
use wirechan_transport::NetStream;

use crate::error::{FramingError, Result};
use crate::preamble::{self, PreambleOffer, PreambleSettings, PreambleValidator};
use crate::reader::RecordReader;
use crate::record::Record;
use crate::writer::RecordWriter;

/// Default segment size for unsized message transfer: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Protocol phase of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingState {
    /// No preamble traffic yet.
    Unstarted,
    /// Initiator has written its preamble, acknowledgement pending.
    PreambleSent,
    /// Preamble exchange complete on this side.
    PreambleAcked,
    /// Message transfer loop.
    Streaming,
    /// End-of-session observed or written; no further records.
    Ended,
}

/// How a message body travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// Chunked segments terminated by an end-of-message record. The
    /// default: an outgoing message's total length generally is not
    /// known up front on stream transports.
    #[default]
    Unsized,
    /// Whole message length-prefixed up front, for callers that
    /// pre-serialize and know the length.
    Sized,
}

/// A framing-protocol connection over a [`NetStream`].
///
/// Reader and writer halves are cloned descriptors of the same stream;
/// the engine is the single owner of both for protocol purposes.
pub struct FramedConnection {
    reader: RecordReader<NetStream>,
    writer: RecordWriter<NetStream>,
    state: FramingState,
    chunk_size: usize,
}

impl FramedConnection {
    /// Wrap a connected stream, applying read/write timeouts.
    pub fn new(
        stream: NetStream,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<Self> {
        let reader_half = stream
            .try_clone()
            .map_err(crate::reader::transport_to_framing_error)?;
        Ok(Self {
            reader: RecordReader::with_timeout(reader_half, read_timeout)?,
            writer: RecordWriter::with_timeout(stream, write_timeout)?,
            state: FramingState::Unstarted,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Override the unsized-transfer segment size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Current protocol phase.
    pub fn state(&self) -> FramingState {
        self.state
    }

    /// Update the read timeout for subsequent operations.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reader
            .get_ref()
            .set_read_timeout(timeout)
            .map_err(crate::reader::transport_to_framing_error)
    }

    /// Update the write timeout for subsequent operations.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.writer
            .get_ref()
            .set_write_timeout(timeout)
            .map_err(crate::reader::transport_to_framing_error)
    }

    /// Run the initiator preamble: `Unstarted → PreambleAcked`.
    pub fn initiate(&mut self, settings: &PreambleSettings) -> Result<()> {
        self.expect_state(FramingState::Unstarted, "initiate preamble")?;
        self.state = FramingState::PreambleSent;
        match preamble::initiate(&mut self.reader, &mut self.writer, settings) {
            Ok(()) => {
                self.state = FramingState::PreambleAcked;
                Ok(())
            }
            Err(err) => {
                self.state = FramingState::Ended;
                Err(err)
            }
        }
    }

    /// Run the acceptor preamble: `Unstarted → PreambleAcked`.
    pub fn accept(&mut self, validator: &dyn PreambleValidator) -> Result<PreambleOffer> {
        self.expect_state(FramingState::Unstarted, "accept preamble")?;
        match preamble::accept(&mut self.reader, &mut self.writer, validator) {
            Ok(offer) => {
                self.state = FramingState::PreambleAcked;
                Ok(offer)
            }
            Err(err) => {
                self.state = FramingState::Ended;
                Err(err)
            }
        }
    }

    /// Write one complete message transfer.
    ///
    /// In unsized mode the payload goes out as length-prefixed chunks
    /// terminated by an end-of-message record; in sized mode as a single
    /// length-prefixed envelope. The entire transfer, including the end
    /// record, is written and flushed before this returns; a peer will
    /// never see a reply request before the request transfer is complete.
    pub fn write_message(&mut self, payload: &[u8], mode: TransferMode) -> Result<()> {
        self.enter_streaming("write message")?;

        match mode {
            TransferMode::Sized => {
                self.writer
                    .stage_record(&Record::SizedEnvelope(Bytes::copy_from_slice(payload)))?;
            }
            TransferMode::Unsized => {
                for chunk in payload.chunks(self.chunk_size) {
                    self.writer
                        .stage_record(&Record::Chunk(Bytes::copy_from_slice(chunk)))?;
                }
                if payload.is_empty() {
                    self.writer.stage_record(&Record::Chunk(Bytes::new()))?;
                }
                self.writer.stage_record(&Record::EndOfMessage)?;
            }
        }
        self.writer.flush_staged()?;
        debug!(len = payload.len(), ?mode, "message transfer written");
        Ok(())
    }

    /// Read one complete message transfer, either mode.
    ///
    /// Mirrors [`write_message`](Self::write_message): accumulates chunks
    /// until the end-of-message record, or takes one sized envelope.
    /// Returns `Ok(None)` when the peer ends the session instead of
    /// sending another message.
    pub fn read_message(&mut self, max_message_size: usize) -> Result<Option<Bytes>> {
        self.enter_streaming("read message")?;

        let mut assembled: Option<BytesMut> = None;
        loop {
            match self.reader.read_record()? {
                Record::SizedEnvelope(payload) => {
                    if assembled.is_some() {
                        return Err(FramingError::UnexpectedRecord {
                            expected: "chunk or end-of-message",
                            found: "sized-envelope",
                        });
                    }
                    if payload.len() > max_message_size {
                        return Err(FramingError::MessageTooLarge {
                            size: payload.len(),
                            max: max_message_size,
                        });
                    }
                    return Ok(Some(payload));
                }
                Record::Chunk(chunk) => {
                    let buf = assembled.get_or_insert_with(BytesMut::new);
                    if buf.len() + chunk.len() > max_message_size {
                        return Err(FramingError::MessageTooLarge {
                            size: buf.len() + chunk.len(),
                            max: max_message_size,
                        });
                    }
                    buf.extend_from_slice(&chunk);
                }
                Record::EndOfMessage => {
                    let buf = assembled.ok_or(FramingError::UnexpectedRecord {
                        expected: "chunk or sized-envelope",
                        found: "end-of-message",
                    })?;
                    return Ok(Some(buf.freeze()));
                }
                Record::EndOfSession => {
                    if assembled.is_some() {
                        return Err(FramingError::UnexpectedRecord {
                            expected: "chunk or end-of-message",
                            found: "end-of-session",
                        });
                    }
                    self.state = FramingState::Ended;
                    return Ok(None);
                }
                Record::Fault(reason) => return Err(FramingError::Fault(reason)),
                other => {
                    return Err(FramingError::UnexpectedRecord {
                        expected: "chunk, sized-envelope or end-of-session",
                        found: other.name(),
                    })
                }
            }
        }
    }

    /// Write the end-of-session record: `Streaming/PreambleAcked → Ended`.
    pub fn end_session(&mut self) -> Result<()> {
        match self.state {
            FramingState::PreambleAcked | FramingState::Streaming => {
                self.writer.write_record(&Record::EndOfSession)?;
                self.state = FramingState::Ended;
                Ok(())
            }
            FramingState::Ended => Ok(()),
            state => Err(FramingError::InvalidState {
                operation: "end session",
                state,
            }),
        }
    }

    /// Make an ended connection eligible for a fresh preamble.
    ///
    /// Used by connection pooling: a cleanly ended connection is reused
    /// by running the handshake again on the same stream.
    pub fn recycle(&mut self) -> Result<()> {
        self.expect_state(FramingState::Ended, "recycle connection")?;
        self.state = FramingState::Unstarted;
        Ok(())
    }

    /// Tear down the underlying connection without protocol traffic.
    pub fn shutdown(&mut self) {
        self.state = FramingState::Ended;
        let _ = self.reader.get_ref().shutdown();
    }

    fn enter_streaming(&mut self, operation: &'static str) -> Result<()> {
        match self.state {
            FramingState::PreambleAcked => {
                self.state = FramingState::Streaming;
                Ok(())
            }
            FramingState::Streaming => Ok(()),
            state => Err(FramingError::InvalidState { operation, state }),
        }
    }

    fn expect_state(&self, expected: FramingState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(FramingError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for FramedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedConnection")
            .field("state", &self.state)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}
