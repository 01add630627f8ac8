use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};

use crate::encoder::MessageEncoder;
use crate::error::{EncodingError, Result};
use crate::message::{Attachment, Body, Message, MessageHeaders};
use crate::quota::ReaderQuotas;
use crate::version::ProtocolVersion;

pub const BINARY_MEDIA_TYPE: &str = "application/vnd.wirechan.msgbin";
pub const BINARY_SESSION_MEDIA_TYPE: &str = "application/vnd.wirechan.msgbin+session";

// Field tags of the binary layout. Every message opens with a version
// code byte and a flags byte, then tagged fields in any order, then End.
const TAG_END: u8 = 0x00;
const TAG_TO: u8 = 0x01;
const TAG_ACTION: u8 = 0x02;
const TAG_MESSAGE_ID: u8 = 0x03;
const TAG_RELATES_TO: u8 = 0x04;
const TAG_BODY: u8 = 0x10;
const TAG_ATTACHMENT: u8 = 0x11;

const FLAG_SESSION: u8 = 0x01;

// The body length field is a u32, so a streamed body is materialized
// against that bound.
const MAX_BODY_BYTES: usize = u32::MAX as usize;

/// Compact tagged-field encoding. The default for stream transports.
#[derive(Debug)]
pub struct BinaryMessageEncoder {
    version: ProtocolVersion,
    session: bool,
}

impl BinaryMessageEncoder {
    pub fn new(version: ProtocolVersion, session: bool) -> Self {
        Self { version, session }
    }
}

impl MessageEncoder for BinaryMessageEncoder {
    fn content_type(&self) -> &str {
        self.media_type()
    }

    fn media_type(&self) -> &str {
        if self.session {
            BINARY_SESSION_MEDIA_TYPE
        } else {
            BINARY_MEDIA_TYPE
        }
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    fn write_message(&self, mut message: Message, out: &mut dyn Write) -> Result<()> {
        self.version.verify(message.version())?;

        let body = message.body_bytes(MAX_BODY_BYTES)?;
        let headers = message.headers();

        let mut buf = BytesMut::with_capacity(64 + body.len());
        buf.put_u8(self.version.wire_code());
        buf.put_u8(if self.session { FLAG_SESSION } else { 0 });

        if let Some(to) = &headers.to {
            put_string_field(&mut buf, TAG_TO, to)?;
        }
        put_string_field(&mut buf, TAG_ACTION, &headers.action)?;
        put_string_field(&mut buf, TAG_MESSAGE_ID, &headers.message_id)?;
        if let Some(relates_to) = &headers.relates_to {
            put_string_field(&mut buf, TAG_RELATES_TO, relates_to)?;
        }

        if !body.is_empty() {
            buf.put_u8(TAG_BODY);
            buf.put_u32_le(body.len() as u32);
            buf.put_slice(&body);
        }

        for attachment in message.attachments() {
            buf.put_u8(TAG_ATTACHMENT);
            put_string(&mut buf, &attachment.content_id)?;
            put_string(&mut buf, &attachment.content_type)?;
            if attachment.data.len() > MAX_BODY_BYTES {
                return Err(EncodingError::MessageTooLarge {
                    size: attachment.data.len(),
                    max: MAX_BODY_BYTES,
                });
            }
            buf.put_u32_le(attachment.data.len() as u32);
            buf.put_slice(&attachment.data);
        }

        buf.put_u8(TAG_END);

        out.write_all(&buf)?;
        tracing::trace!(bytes = buf.len(), "encoded binary message");
        Ok(())
    }

    fn read_message(&self, data: &[u8], quotas: &ReaderQuotas) -> Result<Message> {
        quotas.check_message_size(data.len())?;
        let mut src = data;

        if src.remaining() < 2 {
            return Err(EncodingError::Malformed(
                "binary message shorter than its fixed header".into(),
            ));
        }
        let code = src.get_u8();
        let version = ProtocolVersion::from_wire_code(code).ok_or_else(|| {
            EncodingError::Malformed(format!("unknown protocol version code 0x{code:02x}"))
        })?;
        self.version.verify(version)?;
        let _flags = src.get_u8();

        let mut to = None;
        let mut action = None;
        let mut message_id = None;
        let mut relates_to = None;
        let mut body = Body::Empty;
        let mut attachments = Vec::new();
        let mut header_bytes = 0usize;

        loop {
            if src.remaining() == 0 {
                return Err(EncodingError::Malformed(
                    "binary message missing end tag".into(),
                ));
            }
            match src.get_u8() {
                TAG_END => break,
                TAG_TO => to = Some(get_header_string(&mut src, quotas, &mut header_bytes)?),
                TAG_ACTION => {
                    action = Some(get_header_string(&mut src, quotas, &mut header_bytes)?)
                }
                TAG_MESSAGE_ID => {
                    message_id = Some(get_header_string(&mut src, quotas, &mut header_bytes)?)
                }
                TAG_RELATES_TO => {
                    relates_to = Some(get_header_string(&mut src, quotas, &mut header_bytes)?)
                }
                TAG_BODY => {
                    let bytes = get_bytes(&mut src)?;
                    quotas.check_message_size(bytes.len())?;
                    body = Body::Buffered(bytes.to_vec().into());
                }
                TAG_ATTACHMENT => {
                    let content_id = get_string(&mut src, quotas)?;
                    let content_type = get_string(&mut src, quotas)?;
                    let bytes = get_bytes(&mut src)?;
                    quotas.check_message_size(bytes.len())?;
                    attachments.push(Attachment {
                        content_id,
                        content_type,
                        data: bytes.to_vec().into(),
                    });
                }
                other => {
                    return Err(EncodingError::Malformed(format!(
                        "unknown binary field tag 0x{other:02x}"
                    )))
                }
            }
        }

        let headers = MessageHeaders {
            to,
            action: action
                .ok_or_else(|| EncodingError::Malformed("message lacks an action".into()))?,
            message_id: message_id
                .ok_or_else(|| EncodingError::Malformed("message lacks a message id".into()))?,
            relates_to,
        };
        Ok(Message::from_parts(version, headers, body, attachments))
    }
}

fn put_string_field(buf: &mut BytesMut, tag: u8, value: &str) -> Result<()> {
    buf.put_u8(tag);
    put_string(buf, value)
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(EncodingError::Malformed(format!(
            "string of {} bytes exceeds the u16 length field",
            value.len()
        )));
    }
    buf.put_u16_le(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_string(src: &mut &[u8], quotas: &ReaderQuotas) -> Result<String> {
    if src.remaining() < 2 {
        return Err(EncodingError::Malformed("truncated string length".into()));
    }
    let len = src.get_u16_le() as usize;
    quotas.check_string(len)?;
    if src.remaining() < len {
        return Err(EncodingError::Malformed("truncated string payload".into()));
    }
    let raw = &src[..len];
    let value = std::str::from_utf8(raw)
        .map_err(|_| EncodingError::Malformed("string field is not valid utf-8".into()))?
        .to_owned();
    src.advance(len);
    Ok(value)
}

fn get_header_string(
    src: &mut &[u8],
    quotas: &ReaderQuotas,
    header_bytes: &mut usize,
) -> Result<String> {
    let value = get_string(src, quotas)?;
    *header_bytes += value.len();
    quotas.check_header_size(*header_bytes)?;
    Ok(value)
}

fn get_bytes<'a>(src: &mut &'a [u8]) -> Result<&'a [u8]> {
    if src.remaining() < 4 {
        return Err(EncodingError::Malformed("truncated byte-field length".into()));
    }
    let len = src.get_u32_le() as usize;
    if src.remaining() < len {
        return Err(EncodingError::Malformed("truncated byte-field payload".into()));
    }
    let (raw, rest) = src.split_at(len);
    *src = rest;
    Ok(raw)
}
