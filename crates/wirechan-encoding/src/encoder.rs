use std::io::{Read, Write};
use std::sync::Arc;

use crate::buffer::{BufferManager, EncodedRegion};
use crate::error::{EncodingError, Result};
use crate::message::{CappedWriter, Message};
use crate::quota::ReaderQuotas;
use crate::version::ProtocolVersion;

/// Converts between an in-memory [`Message`] and its wire bytes.
///
/// Stateless per logical message. Each encoder carries a fixed
/// [`ProtocolVersion`] and a content-type identity used during preamble
/// negotiation; a message declaring any other version is rejected before
/// encoding and immediately after decoding.
pub trait MessageEncoder: Send + Sync {
    /// Full content type written into the preamble, parameters included.
    fn content_type(&self) -> &str;

    /// Base media type, without parameters.
    fn media_type(&self) -> &str;

    /// The protocol version this encoder speaks.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Serialize a message to a stream. Consumes the message: headers are
    /// frozen and a streamed body is spent by this call.
    fn write_message(&self, message: Message, out: &mut dyn Write) -> Result<()>;

    /// Deserialize a message from an in-memory byte range.
    ///
    /// When the bytes live in a pooled buffer, the caller returns that
    /// buffer to its pool once the resulting message is released.
    fn read_message(&self, data: &[u8], quotas: &ReaderQuotas) -> Result<Message>;

    /// Whether an inbound content type can be decoded by this encoder.
    ///
    /// Exact match against our own content type; a candidate carrying
    /// parameters matches on its base media type instead.
    fn is_content_type_supported(&self, candidate: &str) -> bool {
        if candidate == self.content_type() {
            return true;
        }
        if let Some((base, _params)) = candidate.split_once(';') {
            return base.trim().eq_ignore_ascii_case(self.media_type());
        }
        false
    }

    /// Serialize to a byte vector bounded by `max_message_size`.
    fn write_message_bytes(&self, message: Message, max_message_size: usize) -> Result<Vec<u8>> {
        let mut sink = CappedWriter::new(max_message_size);
        match self.write_message(message, &mut sink) {
            Ok(()) => Ok(sink.into_inner()),
            Err(EncodingError::Io(err))
                if err.kind() == std::io::ErrorKind::FileTooLarge =>
            {
                Err(EncodingError::MessageTooLarge {
                    size: sink.overflow_size(),
                    max: max_message_size,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Serialize into a pooled buffer, leaving `reserved_prefix` bytes of
    /// headroom so a transport can prepend framing without a copy.
    fn write_message_buffered(
        &self,
        message: Message,
        manager: &BufferManager,
        reserved_prefix: usize,
    ) -> Result<EncodedRegion> {
        let mut buf = manager.take();
        buf.resize(reserved_prefix, 0);
        match self.write_message(message, &mut buf) {
            Ok(()) => Ok(EncodedRegion::new(buf, reserved_prefix)),
            Err(err) => {
                manager.recycle(buf);
                Err(err)
            }
        }
    }

    /// Deserialize from a stream, bounded by the message-size quota.
    fn read_message_from(&self, stream: &mut dyn Read, quotas: &ReaderQuotas) -> Result<Message> {
        let mut data = Vec::new();
        // One extra byte detects a stream running past the quota.
        let limit = quotas.max_message_size as u64 + 1;
        stream.take(limit).read_to_end(&mut data)?;
        quotas.check_message_size(data.len())?;
        self.read_message(&data, quotas)
    }
}

/// The encoding variants a binding may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Binary,
    Text,
    Mtom,
}

/// Builds encoder instances for one kind/version pair.
///
/// The session flag requests the session-capable variant where the
/// encoding has one (binary); text and MTOM have no session form and
/// ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderFactory {
    kind: EncoderKind,
    version: ProtocolVersion,
    session: bool,
}

impl EncoderFactory {
    pub fn new(kind: EncoderKind, version: ProtocolVersion) -> Self {
        Self {
            kind,
            version,
            session: false,
        }
    }

    /// Request the session-capable variant.
    pub fn for_session(mut self) -> Self {
        self.session = true;
        self
    }

    pub fn kind(&self) -> EncoderKind {
        self.kind
    }

    pub fn is_session(&self) -> bool {
        self.session
    }

    /// Create an encoder instance.
    pub fn create(&self) -> Arc<dyn MessageEncoder> {
        match self.kind {
            EncoderKind::Binary => Arc::new(crate::binary::BinaryMessageEncoder::new(
                self.version,
                self.session,
            )),
            EncoderKind::Text => Arc::new(crate::text::TextMessageEncoder::new(self.version)),
            EncoderKind::Mtom => Arc::new(crate::mtom::MtomMessageEncoder::new(self.version)),
        }
    }
}

impl Default for EncoderFactory {
    /// Binary is the default encoding for stream transports.
    fn default() -> Self {
        Self::new(EncoderKind::Binary, ProtocolVersion::default())
    }
}

/// Pick, from a receiver's candidate set, the encoder matching an
/// inbound content type.
pub fn select_encoder<'a>(
    candidates: &'a [Arc<dyn MessageEncoder>],
    content_type: &str,
) -> Option<&'a Arc<dyn MessageEncoder>> {
    candidates
        .iter()
        .find(|encoder| encoder.is_content_type_supported(content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<Arc<dyn MessageEncoder>> {
        vec![
            EncoderFactory::new(EncoderKind::Binary, ProtocolVersion::default()).create(),
            EncoderFactory::new(EncoderKind::Text, ProtocolVersion::default()).create(),
            EncoderFactory::new(EncoderKind::Mtom, ProtocolVersion::default()).create(),
        ]
    }

    #[test]
    fn exact_content_type_supported() {
        let encoders = candidates();
        for encoder in &encoders {
            assert!(encoder.is_content_type_supported(encoder.content_type()));
        }
    }

    #[test]
    fn parameterized_content_type_matches_media_type() {
        let encoders = candidates();
        let binary = &encoders[0];
        let with_params = format!("{}; level=9; foo=bar", binary.media_type());
        assert!(binary.is_content_type_supported(&with_params));
    }

    #[test]
    fn unrelated_media_type_rejected() {
        let encoders = candidates();
        for encoder in &encoders {
            assert!(!encoder.is_content_type_supported("application/octet-stream"));
            assert!(!encoder.is_content_type_supported("application/json; charset=utf-8"));
        }
    }

    #[test]
    fn selection_picks_matching_candidate() {
        let encoders = candidates();
        let selected = select_encoder(&encoders, encoders[1].content_type()).unwrap();
        assert_eq!(selected.content_type(), encoders[1].content_type());

        assert!(select_encoder(&encoders, "video/mp4").is_none());
    }

    #[test]
    fn session_flag_only_affects_binary() {
        let session_binary = EncoderFactory::new(EncoderKind::Binary, ProtocolVersion::default())
            .for_session()
            .create();
        let plain_binary =
            EncoderFactory::new(EncoderKind::Binary, ProtocolVersion::default()).create();
        assert_ne!(session_binary.content_type(), plain_binary.content_type());

        let session_text = EncoderFactory::new(EncoderKind::Text, ProtocolVersion::default())
            .for_session()
            .create();
        let plain_text =
            EncoderFactory::new(EncoderKind::Text, ProtocolVersion::default()).create();
        assert_eq!(session_text.content_type(), plain_text.content_type());
    }

    #[test]
    fn write_message_bytes_respects_bound() {
        let encoder = EncoderFactory::default().create();
        let message = Message::new(ProtocolVersion::default(), "Op").with_body(vec![0u8; 4096]);
        let err = encoder.write_message_bytes(message, 64).unwrap_err();
        assert!(matches!(err, EncodingError::MessageTooLarge { .. }));
    }

    #[test]
    fn buffered_write_reserves_prefix() {
        let encoder = EncoderFactory::default().create();
        let manager = BufferManager::default();
        let message = Message::new(ProtocolVersion::default(), "Op").with_body(&b"hello"[..]);

        let mut region = encoder.write_message_buffered(message, &manager, 8).unwrap();
        assert_eq!(region.prefix_mut().len(), 8);

        let decoded = encoder
            .read_message(region.message_bytes(), &ReaderQuotas::default())
            .unwrap();
        assert_eq!(decoded.headers().action, "Op");

        region.recycle(&manager);
        assert_eq!(manager.pooled(), 1);
    }

    #[test]
    fn read_message_from_stream_enforces_quota() {
        let encoder = EncoderFactory::default().create();
        let quotas = ReaderQuotas {
            max_message_size: 16,
            ..ReaderQuotas::default()
        };
        let big = vec![0u8; 64];
        let err = encoder
            .read_message_from(&mut &big[..], &quotas)
            .unwrap_err();
        assert!(matches!(err, EncodingError::QuotaExceeded { .. }));
    }
}
