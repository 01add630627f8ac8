//! Preamble handshake and record framing for stream transports.
//!
//! This is the wire protocol both peers must implement identically. A
//! physical connection goes through a preamble exchange (protocol
//! version, via address, content type, acknowledgement) before any
//! message traffic, then carries message transfers as either a single
//! length-prefixed envelope ("sized") or a run of length-prefixed chunks
//! terminated by an end-of-message record ("unsized").
//!
//! No partial reads, no buffer management in user code.

pub mod engine;
pub mod error;
pub mod preamble;
pub mod reader;
pub mod record;
pub mod writer;

pub use engine::{FramedConnection, FramingState, TransferMode, DEFAULT_CHUNK_SIZE};
pub use error::{FramingError, Result};
pub use preamble::{PreambleOffer, PreambleSettings, PreambleValidator, FRAMING_VERSION};
pub use record::{decode_record, encode_record, Record, DEFAULT_MAX_RECORD_PAYLOAD};
pub use reader::RecordReader;
pub use writer::RecordWriter;
