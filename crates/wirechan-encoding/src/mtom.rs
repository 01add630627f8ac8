use std::io::Write;

use crate::encoder::MessageEncoder;
use crate::error::{EncodingError, Result};
use crate::message::{Attachment, Message};
use crate::quota::ReaderQuotas;
use crate::text::{parse_envelope, write_envelope};
use crate::version::ProtocolVersion;

pub const MTOM_MEDIA_TYPE: &str = "multipart/related";
pub const MTOM_CONTENT_TYPE: &str = "multipart/related; type=\"application/xop+xml\"; \
     boundary=\"wirechan-mtom-boundary\"; start=\"<root@wirechan>\"";

const BOUNDARY: &[u8] = b"--wirechan-mtom-boundary";
const ROOT_CONTENT_ID: &str = "root@wirechan";
const ROOT_PART_TYPE: &str = "application/xop+xml; charset=utf-8";

const MAX_BODY_BYTES: usize = u32::MAX as usize;

/// Multipart container encoding for messages carrying raw binary
/// attachments.
///
/// The root part is the same canonical XML envelope the text encoding
/// produces; each attachment follows as its own part, bytes unencoded,
/// referenced by Content-ID. The boundary string is fixed, so the
/// advertised content type is a constant.
#[derive(Debug)]
pub struct MtomMessageEncoder {
    version: ProtocolVersion,
}

impl MtomMessageEncoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }
}

impl MessageEncoder for MtomMessageEncoder {
    fn content_type(&self) -> &str {
        MTOM_CONTENT_TYPE
    }

    fn media_type(&self) -> &str {
        MTOM_MEDIA_TYPE
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    fn write_message(&self, mut message: Message, out: &mut dyn Write) -> Result<()> {
        self.version.verify(message.version())?;
        let body = message.body_bytes(MAX_BODY_BYTES)?;
        let envelope = write_envelope(self.version, message.headers(), &body);

        let mut buf = Vec::with_capacity(envelope.len() + 256);
        push_part_header(&mut buf, ROOT_PART_TYPE, ROOT_CONTENT_ID, false);
        buf.extend_from_slice(&envelope);
        buf.extend_from_slice(b"\r\n");

        for attachment in message.attachments() {
            push_part_header(&mut buf, &attachment.content_type, &attachment.content_id, true);
            buf.extend_from_slice(&attachment.data);
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(BOUNDARY);
        buf.extend_from_slice(b"--\r\n");

        out.write_all(&buf)?;
        tracing::trace!(
            bytes = buf.len(),
            attachments = message.attachments().len(),
            "encoded mtom message"
        );
        Ok(())
    }

    fn read_message(&self, data: &[u8], quotas: &ReaderQuotas) -> Result<Message> {
        quotas.check_message_size(data.len())?;

        let mut envelope_part = None;
        let mut attachments = Vec::new();

        for part in split_parts(data)? {
            let part = parse_part(part)?;
            if part.content_id == ROOT_CONTENT_ID {
                envelope_part = Some(part.data);
            } else {
                quotas.check_string(part.content_id.len())?;
                attachments.push(Attachment {
                    content_id: part.content_id,
                    content_type: part.content_type,
                    data: part.data.to_vec().into(),
                });
            }
        }

        let envelope = envelope_part.ok_or_else(|| {
            EncodingError::Malformed("multipart message lacks a root envelope part".into())
        })?;
        let (version, headers, body) = parse_envelope(envelope, quotas)?;
        self.version.verify(version)?;
        Ok(Message::from_parts(version, headers, body, attachments))
    }
}

fn push_part_header(buf: &mut Vec<u8>, content_type: &str, content_id: &str, binary: bool) {
    buf.extend_from_slice(BOUNDARY);
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
    if binary {
        buf.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
    }
    buf.extend_from_slice(format!("Content-ID: <{content_id}>\r\n\r\n").as_bytes());
}

struct Part<'a> {
    content_id: String,
    content_type: String,
    data: &'a [u8],
}

/// Split the raw document into part slices, boundary lines removed.
fn split_parts(data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut parts = Vec::new();
    let mut rest = data;

    let first = find(rest, BOUNDARY)
        .ok_or_else(|| EncodingError::Malformed("multipart document lacks a boundary".into()))?;
    rest = &rest[first + BOUNDARY.len()..];

    loop {
        if rest.starts_with(b"--") {
            break;
        }
        let rest_body = rest.strip_prefix(b"\r\n").ok_or_else(|| {
            EncodingError::Malformed("boundary line not followed by CRLF".into())
        })?;
        let next = find(rest_body, BOUNDARY).ok_or_else(|| {
            EncodingError::Malformed("multipart document is missing its closing boundary".into())
        })?;
        // Trailing CRLF before the next boundary belongs to the separator.
        let part = rest_body[..next]
            .strip_suffix(b"\r\n")
            .ok_or_else(|| EncodingError::Malformed("part does not end with CRLF".into()))?;
        parts.push(part);
        rest = &rest_body[next + BOUNDARY.len()..];
    }

    if parts.is_empty() {
        return Err(EncodingError::Malformed(
            "multipart document contains no parts".into(),
        ));
    }
    Ok(parts)
}

fn parse_part(raw: &[u8]) -> Result<Part<'_>> {
    let split = find(raw, b"\r\n\r\n").ok_or_else(|| {
        EncodingError::Malformed("part lacks a blank line after its headers".into())
    })?;
    let header_region = std::str::from_utf8(&raw[..split])
        .map_err(|_| EncodingError::Malformed("part headers are not valid utf-8".into()))?;
    let data = &raw[split + 4..];

    let mut content_id = None;
    let mut content_type = None;
    for line in header_region.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-id") {
            content_id = Some(
                value
                    .strip_prefix('<')
                    .and_then(|v| v.strip_suffix('>'))
                    .unwrap_or(value)
                    .to_owned(),
            );
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_owned());
        }
    }

    Ok(Part {
        content_id: content_id
            .ok_or_else(|| EncodingError::Malformed("part lacks a Content-ID header".into()))?,
        content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_owned()),
        data,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;

    fn encoder() -> MtomMessageEncoder {
        MtomMessageEncoder::new(ProtocolVersion::default())
    }

    fn round_trip(message: Message) -> Message {
        let enc = encoder();
        let bytes = enc.write_message_bytes(message, 1 << 20).unwrap();
        enc.read_message(&bytes, &ReaderQuotas::default()).unwrap()
    }

    #[test]
    fn attachment_bytes_survive_untouched() {
        // Payload deliberately contains CRLF pairs and high bytes.
        let payload: Vec<u8> = (0u8..=255).chain([b'\r', b'\n', b'\r', b'\n']).collect();
        let message = Message::new(ProtocolVersion::default(), "urn:ops/Upload")
            .with_body(&b"<Upload/>"[..])
            .with_attachment(Attachment {
                content_id: "blob-1@wirechan".into(),
                content_type: "application/octet-stream".into(),
                data: payload.clone().into(),
            });

        let decoded = round_trip(message);
        assert_eq!(decoded.attachments().len(), 1);
        assert_eq!(decoded.attachments()[0].content_id, "blob-1@wirechan");
        assert_eq!(decoded.attachments()[0].data.as_ref(), &payload[..]);
    }

    #[test]
    fn multiple_attachments_round_trip_in_order() {
        let mut message = Message::new(ProtocolVersion::default(), "urn:ops/Batch");
        for i in 0..3 {
            message = message.with_attachment(Attachment {
                content_id: format!("part-{i}@wirechan"),
                content_type: "image/png".into(),
                data: vec![i as u8; 16].into(),
            });
        }
        let decoded = round_trip(message);
        let ids: Vec<_> = decoded
            .attachments()
            .iter()
            .map(|a| a.content_id.as_str())
            .collect();
        assert_eq!(ids, ["part-0@wirechan", "part-1@wirechan", "part-2@wirechan"]);
    }

    #[test]
    fn headers_come_from_the_root_part() {
        let message = Message::new(ProtocolVersion::default(), "urn:ops/Ping")
            .with_to("pipe:///tmp/svc.sock");
        let id = message.headers().message_id.clone();
        let decoded = round_trip(message);
        assert_eq!(decoded.headers().action, "urn:ops/Ping");
        assert_eq!(decoded.headers().message_id, id);
        assert_eq!(decoded.headers().to.as_deref(), Some("pipe:///tmp/svc.sock"));
        assert!(matches!(decoded.body(), Body::Empty));
    }

    #[test]
    fn version_guard_applies_to_the_root_envelope() {
        let writer = MtomMessageEncoder::new(ProtocolVersion::SOAP11_ADDRESSING10);
        let bytes = writer
            .write_message_bytes(
                Message::new(ProtocolVersion::SOAP11_ADDRESSING10, "Op"),
                1 << 20,
            )
            .unwrap();
        let err = encoder()
            .read_message(&bytes, &ReaderQuotas::default())
            .unwrap_err();
        assert!(matches!(err, crate::EncodingError::VersionMismatch { .. }));
    }

    #[test]
    fn missing_root_part_is_malformed() {
        let doc = b"--wirechan-mtom-boundary\r\n\
            Content-Type: image/png\r\n\
            Content-ID: <only@wirechan>\r\n\r\n\
            PNG\r\n\
            --wirechan-mtom-boundary--\r\n";
        let err = encoder()
            .read_message(doc, &ReaderQuotas::default())
            .unwrap_err();
        assert!(matches!(err, crate::EncodingError::Malformed(_)));
    }

    #[test]
    fn garbage_document_is_malformed() {
        let err = encoder()
            .read_message(b"not multipart at all", &ReaderQuotas::default())
            .unwrap_err();
        assert!(matches!(err, crate::EncodingError::Malformed(_)));
    }

    #[test]
    fn content_type_negotiation_matches_parameterized_form() {
        let enc = encoder();
        assert!(enc.is_content_type_supported(MTOM_CONTENT_TYPE));
        assert!(enc.is_content_type_supported(
            "multipart/related; type=\"application/xop+xml\"; boundary=\"other\""
        ));
        assert!(!enc.is_content_type_supported("application/soap+xml; charset=utf-8"));
    }
}
