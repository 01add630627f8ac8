//! Message model and pluggable wire encoders.
//!
//! A [`Message`] is an envelope of addressing headers plus an opaque body.
//! A [`MessageEncoder`] converts between the in-memory message and its
//! wire byte representation; three codec variants are provided:
//!
//! - [`binary`]: compact tagged binary form, the default for stream
//!   transports; fastest, content type identifies it uniquely.
//! - [`text`]: canonical XML/SOAP text with a charset parameter.
//! - [`mtom`]: multipart container carrying raw binary attachments
//!   alongside an XML root part.
//!
//! Encoders are stateless per message and carry a fixed
//! [`ProtocolVersion`]; every encode and decode verifies the message's
//! declared version against the encoder's own and fails fast on mismatch.

pub mod binary;
pub mod buffer;
pub mod encoder;
pub mod error;
pub mod message;
pub mod mtom;
pub mod quota;
pub mod text;
pub mod version;

pub use binary::BinaryMessageEncoder;
pub use buffer::{BufferManager, EncodedRegion};
pub use encoder::{select_encoder, EncoderFactory, EncoderKind, MessageEncoder};
pub use error::{EncodingError, Result};
pub use message::{Attachment, Body, BodyWriter, Message, MessageHeaders};
pub use mtom::MtomMessageEncoder;
pub use quota::ReaderQuotas;
pub use text::TextMessageEncoder;
pub use version::{AddressingVersion, EnvelopeVersion, ProtocolVersion};
