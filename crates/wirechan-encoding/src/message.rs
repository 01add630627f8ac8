use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;

use crate::error::{EncodingError, Result};
use crate::version::ProtocolVersion;

/// Addressing headers of a message envelope.
///
/// Mutation is only meaningful before the message is handed to an
/// encoder; encoding consumes the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
    /// Logical destination the message is addressed to.
    pub to: Option<String>,
    /// The operation this message invokes or answers.
    pub action: String,
    /// Unique identifier of this message.
    pub message_id: String,
    /// Message id of the request this message replies to.
    pub relates_to: Option<String>,
}

/// Writes body contents in a single forward pass over the output.
///
/// Not restartable: the writer is consumed. Callers needing replay must
/// buffer first via [`Message::ensure_buffered`].
pub trait BodyWriter: Send {
    fn write_body(self: Box<Self>, out: &mut dyn Write) -> std::io::Result<()>;
}

impl<F> BodyWriter for F
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()> + Send,
{
    fn write_body(self: Box<Self>, out: &mut dyn Write) -> std::io::Result<()> {
        (*self)(out)
    }
}

/// Message body representations.
pub enum Body {
    /// No body content.
    Empty,
    /// A buffered copy, replayable any number of times.
    Buffered(Bytes),
    /// A one-shot forward writer.
    Streamed(Box<dyn BodyWriter>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Buffered(bytes) => write!(f, "Body::Buffered({} bytes)", bytes.len()),
            Body::Streamed(_) => write!(f, "Body::Streamed"),
        }
    }
}

/// A binary attachment carried alongside the envelope (MTOM).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Content-ID referencing this part from the root envelope.
    pub content_id: String,
    /// Media type of the raw bytes.
    pub content_type: String,
    /// The attachment bytes, carried unencoded.
    pub data: Bytes,
}

/// An envelope with addressing headers and an opaque body.
#[derive(Debug)]
pub struct Message {
    version: ProtocolVersion,
    headers: MessageHeaders,
    body: Body,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Create a message for the given action with a fresh message id.
    pub fn new(version: ProtocolVersion, action: impl Into<String>) -> Self {
        Self {
            version,
            headers: MessageHeaders {
                to: None,
                action: action.into(),
                message_id: fresh_message_id(),
                relates_to: None,
            },
            body: Body::Empty,
            attachments: Vec::new(),
        }
    }

    /// Create a reply correlated to `request` via its message id.
    pub fn reply_to(request: &Message, action: impl Into<String>) -> Self {
        let mut reply = Self::new(request.version, action);
        reply.headers.relates_to = Some(request.headers.message_id.clone());
        reply
    }

    /// Rebuild a message decoded from the wire.
    pub fn from_parts(
        version: ProtocolVersion,
        headers: MessageHeaders,
        body: Body,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            version,
            headers,
            body,
            attachments,
        }
    }

    /// Set the logical destination header.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.headers.to = Some(to.into());
        self
    }

    /// Attach a buffered body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Buffered(body.into());
        self
    }

    /// Attach a one-shot streaming body writer.
    pub fn with_body_writer(mut self, writer: impl BodyWriter + 'static) -> Self {
        self.body = Body::Streamed(Box::new(writer));
        self
    }

    /// Add a binary attachment (meaningful for the MTOM encoding).
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Mutable header access; only valid before the message is encoded.
    pub fn headers_mut(&mut self) -> &mut MessageHeaders {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Convert a streamed body into a buffered copy, bounded by
    /// `max_buffered_size`.
    ///
    /// After this the body can be replayed any number of times. A writer
    /// producing more than the bound fails with `MessageTooLarge` and the
    /// body is consumed.
    pub fn ensure_buffered(&mut self, max_buffered_size: usize) -> Result<()> {
        let body = std::mem::replace(&mut self.body, Body::Empty);
        match body {
            Body::Empty => Ok(()),
            Body::Buffered(bytes) => {
                if bytes.len() > max_buffered_size {
                    return Err(EncodingError::MessageTooLarge {
                        size: bytes.len(),
                        max: max_buffered_size,
                    });
                }
                self.body = Body::Buffered(bytes);
                Ok(())
            }
            Body::Streamed(writer) => {
                let mut sink = CappedWriter::new(max_buffered_size);
                match writer.write_body(&mut sink) {
                    Ok(()) => {
                        self.body = Body::Buffered(Bytes::from(sink.into_inner()));
                        Ok(())
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::FileTooLarge => {
                        Err(EncodingError::MessageTooLarge {
                            size: sink.overflow_size(),
                            max: max_buffered_size,
                        })
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Buffered body bytes, materializing a streamed body first.
    pub fn body_bytes(&mut self, max_buffered_size: usize) -> Result<Bytes> {
        self.ensure_buffered(max_buffered_size)?;
        match &self.body {
            Body::Empty => Ok(Bytes::new()),
            Body::Buffered(bytes) => Ok(bytes.clone()),
            Body::Streamed(_) => unreachable!("ensure_buffered left a streamed body"),
        }
    }
}

/// A `Write` sink that fails once more than `max` bytes are written.
pub(crate) struct CappedWriter {
    buf: Vec<u8>,
    max: usize,
    overflow: usize,
}

impl CappedWriter {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            max,
            overflow: 0,
        }
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Total bytes the producer attempted to write when the cap tripped.
    pub(crate) fn overflow_size(&self) -> usize {
        self.overflow
    }
}

impl Write for CappedWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.buf.len() + data.len() > self.max {
            self.overflow = self.buf.len() + data.len();
            return Err(std::io::Error::new(
                std::io::ErrorKind::FileTooLarge,
                format!("output exceeds {} bytes", self.max),
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Generate a process-unique message id.
pub fn fresh_message_id() -> String {
    static SEED: OnceLock<u128> = OnceLock::new();
    static COUNTER: AtomicU64 = AtomicU64::new(1);

    let seed = SEED.get_or_init(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
            ^ (std::process::id() as u128)
    });
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("urn:wirechan:msg:{seed:024x}:{seq}")
}
