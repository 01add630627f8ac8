use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FramingError, Result};

/// Default maximum record payload size: 16 MiB.
pub const DEFAULT_MAX_RECORD_PAYLOAD: usize = 16 * 1024 * 1024;

// Record kind bytes. Both peers must agree on these exactly.
const KIND_VERSION: u8 = 0x00;
const KIND_VIA: u8 = 0x01;
const KIND_CONTENT_TYPE: u8 = 0x02;
const KIND_PREAMBLE_END: u8 = 0x03;
const KIND_PREAMBLE_ACK: u8 = 0x04;
const KIND_FAULT: u8 = 0x05;
const KIND_SIZED_ENVELOPE: u8 = 0x06;
const KIND_CHUNK: u8 = 0x07;
const KIND_END_OF_MESSAGE: u8 = 0x08;
const KIND_END_OF_SESSION: u8 = 0x09;
const KIND_KNOWN_ENCODING: u8 = 0x0A;

// Content types both peers know by a one-byte code. Anything else
// travels in the extensible string form.
const KNOWN_ENCODINGS: &[(u8, &str)] = &[
    (0x00, "application/soap+xml; charset=utf-8"),
    (0x01, "text/xml; charset=utf-8"),
    (0x02, "application/vnd.wirechan.msgbin"),
    (0x03, "application/vnd.wirechan.msgbin+session"),
];

fn known_encoding_code(content_type: &str) -> Option<u8> {
    KNOWN_ENCODINGS
        .iter()
        .find(|(_, name)| *name == content_type)
        .map(|(code, _)| *code)
}

fn known_encoding_name(code: u8) -> Option<&'static str> {
    KNOWN_ENCODINGS
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, name)| *name)
}

/// One typed record of the framing protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Framing protocol version, first record of every preamble.
    Version { major: u8, minor: u8 },
    /// The via address the initiator intends to address.
    Via(String),
    /// Content type of the encoder the initiator intends to use.
    ///
    /// Well-known content types go over the wire as a one-byte code;
    /// other values use the extensible length-prefixed string form.
    /// Both decode back to this variant.
    ContentType(String),
    /// Terminates the preamble record run.
    PreambleEnd,
    /// Acceptor's acknowledgement; the connection is now usable.
    PreambleAck,
    /// Acceptor rejection; carries a human-readable reason, then the
    /// connection is closed.
    Fault(String),
    /// A whole message, length-prefixed up front.
    SizedEnvelope(Bytes),
    /// One length-prefixed segment of an unsized message body.
    Chunk(Bytes),
    /// Terminates an unsized message transfer.
    EndOfMessage,
    /// Sender is done with this connection.
    EndOfSession,
}

impl Record {
    /// Record name for diagnostics and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Record::Version { .. } => "version",
            Record::Via(_) => "via",
            Record::ContentType(_) => "content-type",
            Record::PreambleEnd => "preamble-end",
            Record::PreambleAck => "preamble-ack",
            Record::Fault(_) => "fault",
            Record::SizedEnvelope(_) => "sized-envelope",
            Record::Chunk(_) => "chunk",
            Record::EndOfMessage => "end-of-message",
            Record::EndOfSession => "end-of-session",
        }
    }
}

/// Encode a record into the wire format.
///
/// Wire format: a 1-byte kind, followed by a payload whose shape depends
/// on the kind: two version bytes, a one-byte known-encoding code, a
/// `u16` length-prefixed UTF-8 string, a `u32` length-prefixed byte
/// run, or nothing for marker records. All integers little-endian.
pub fn encode_record(record: &Record, dst: &mut BytesMut) -> Result<()> {
    match record {
        Record::Version { major, minor } => {
            dst.reserve(3);
            dst.put_u8(KIND_VERSION);
            dst.put_u8(*major);
            dst.put_u8(*minor);
        }
        Record::Via(s) => put_string(dst, KIND_VIA, s)?,
        Record::ContentType(s) => match known_encoding_code(s) {
            Some(code) => {
                dst.reserve(2);
                dst.put_u8(KIND_KNOWN_ENCODING);
                dst.put_u8(code);
            }
            None => put_string(dst, KIND_CONTENT_TYPE, s)?,
        },
        Record::PreambleEnd => dst.put_u8(KIND_PREAMBLE_END),
        Record::PreambleAck => dst.put_u8(KIND_PREAMBLE_ACK),
        Record::Fault(s) => put_string(dst, KIND_FAULT, s)?,
        Record::SizedEnvelope(payload) => put_bytes(dst, KIND_SIZED_ENVELOPE, payload)?,
        Record::Chunk(payload) => put_bytes(dst, KIND_CHUNK, payload)?,
        Record::EndOfMessage => dst.put_u8(KIND_END_OF_MESSAGE),
        Record::EndOfSession => dst.put_u8(KIND_END_OF_SESSION),
    }
    Ok(())
}

fn put_string(dst: &mut BytesMut, kind: u8, s: &str) -> Result<()> {
    if s.len() > u16::MAX as usize {
        return Err(FramingError::RecordTooLarge {
            size: s.len(),
            max: u16::MAX as usize,
        });
    }
    dst.reserve(3 + s.len());
    dst.put_u8(kind);
    dst.put_u16_le(s.len() as u16);
    dst.put_slice(s.as_bytes());
    Ok(())
}

fn put_bytes(dst: &mut BytesMut, kind: u8, payload: &[u8]) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FramingError::RecordTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(5 + payload.len());
    dst.put_u8(kind);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a record from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete record yet.
/// On success, consumes the record bytes from the buffer.
pub fn decode_record(src: &mut BytesMut, max_payload: usize) -> Result<Option<Record>> {
    if src.is_empty() {
        return Ok(None);
    }

    let kind = src[0];
    let record = match kind {
        KIND_VERSION => {
            if src.len() < 3 {
                return Ok(None);
            }
            let major = src[1];
            let minor = src[2];
            src.advance(3);
            Record::Version { major, minor }
        }
        KIND_VIA | KIND_CONTENT_TYPE | KIND_FAULT => {
            if src.len() < 3 {
                return Ok(None);
            }
            let len = u16::from_le_bytes([src[1], src[2]]) as usize;
            if len > max_payload {
                return Err(FramingError::RecordTooLarge {
                    size: len,
                    max: max_payload,
                });
            }
            if src.len() < 3 + len {
                return Ok(None);
            }
            src.advance(3);
            let raw = src.split_to(len);
            let s =
                String::from_utf8(raw.to_vec()).map_err(|_| FramingError::InvalidUtf8)?;
            match kind {
                KIND_VIA => Record::Via(s),
                KIND_CONTENT_TYPE => Record::ContentType(s),
                _ => Record::Fault(s),
            }
        }
        KIND_SIZED_ENVELOPE | KIND_CHUNK => {
            if src.len() < 5 {
                return Ok(None);
            }
            let len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
            if len > max_payload {
                return Err(FramingError::RecordTooLarge {
                    size: len,
                    max: max_payload,
                });
            }
            if src.len() < 5 + len {
                return Ok(None);
            }
            src.advance(5);
            let payload = src.split_to(len).freeze();
            if kind == KIND_SIZED_ENVELOPE {
                Record::SizedEnvelope(payload)
            } else {
                Record::Chunk(payload)
            }
        }
        KIND_KNOWN_ENCODING => {
            if src.len() < 2 {
                return Ok(None);
            }
            let code = src[1];
            let name = known_encoding_name(code).ok_or(FramingError::UnknownEncoding(code))?;
            src.advance(2);
            Record::ContentType(name.to_owned())
        }
        KIND_PREAMBLE_END => {
            src.advance(1);
            Record::PreambleEnd
        }
        KIND_PREAMBLE_ACK => {
            src.advance(1);
            Record::PreambleAck
        }
        KIND_END_OF_MESSAGE => {
            src.advance(1);
            Record::EndOfMessage
        }
        KIND_END_OF_SESSION => {
            src.advance(1);
            Record::EndOfSession
        }
        other => return Err(FramingError::UnknownRecord(other)),
    };

    Ok(Some(record))
}
