use std::io::Write;

use crate::encoder::MessageEncoder;
use crate::error::{EncodingError, Result};
use crate::message::{Body, Message, MessageHeaders};
use crate::quota::ReaderQuotas;
use crate::version::{EnvelopeVersion, ProtocolVersion};

pub const SOAP12_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";
pub const SOAP12_MEDIA_TYPE: &str = "application/soap+xml";
pub const SOAP11_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
pub const SOAP11_MEDIA_TYPE: &str = "text/xml";

// A u32 body length field does not exist here, but a streamed body is
// still materialized before the envelope is assembled.
const MAX_BODY_BYTES: usize = u32::MAX as usize;

/// Canonical XML envelope encoding.
///
/// Produces and consumes one fixed serialization: a single-line envelope
/// with `s:` and `a:` prefixes bound on the root element. Header values
/// are XML-escaped text; the body is carried verbatim between the body
/// tags and is expected to be a well-formed fragment.
#[derive(Debug)]
pub struct TextMessageEncoder {
    version: ProtocolVersion,
}

impl TextMessageEncoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }
}

impl MessageEncoder for TextMessageEncoder {
    fn content_type(&self) -> &str {
        match self.version.envelope {
            EnvelopeVersion::Soap12 => SOAP12_CONTENT_TYPE,
            EnvelopeVersion::Soap11 => SOAP11_CONTENT_TYPE,
        }
    }

    fn media_type(&self) -> &str {
        match self.version.envelope {
            EnvelopeVersion::Soap12 => SOAP12_MEDIA_TYPE,
            EnvelopeVersion::Soap11 => SOAP11_MEDIA_TYPE,
        }
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    fn write_message(&self, mut message: Message, out: &mut dyn Write) -> Result<()> {
        self.version.verify(message.version())?;
        let body = message.body_bytes(MAX_BODY_BYTES)?;
        let envelope = write_envelope(self.version, message.headers(), &body);
        out.write_all(&envelope)?;
        tracing::trace!(bytes = envelope.len(), "encoded text message");
        Ok(())
    }

    fn read_message(&self, data: &[u8], quotas: &ReaderQuotas) -> Result<Message> {
        quotas.check_message_size(data.len())?;
        let (version, headers, body) = parse_envelope(data, quotas)?;
        self.version.verify(version)?;
        Ok(Message::from_parts(version, headers, body, Vec::new()))
    }
}

/// Serialize headers and body bytes into the canonical envelope form.
pub(crate) fn write_envelope(
    version: ProtocolVersion,
    headers: &MessageHeaders,
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"utf-8\"?>");
    out.extend_from_slice(
        format!(
            "<s:Envelope xmlns:s=\"{}\" xmlns:a=\"{}\">",
            version.envelope.namespace(),
            version.addressing.namespace()
        )
        .as_bytes(),
    );
    out.extend_from_slice(b"<s:Header>");
    push_header(&mut out, "a:Action", &headers.action);
    push_header(&mut out, "a:MessageID", &headers.message_id);
    if let Some(relates_to) = &headers.relates_to {
        push_header(&mut out, "a:RelatesTo", relates_to);
    }
    if let Some(to) = &headers.to {
        push_header(&mut out, "a:To", to);
    }
    out.extend_from_slice(b"</s:Header><s:Body>");
    out.extend_from_slice(body);
    out.extend_from_slice(b"</s:Body></s:Envelope>");
    out
}

/// Parse the canonical envelope form back into message parts.
pub(crate) fn parse_envelope(
    data: &[u8],
    quotas: &ReaderQuotas,
) -> Result<(ProtocolVersion, MessageHeaders, Body)> {
    let doc = std::str::from_utf8(data)
        .map_err(|_| EncodingError::Malformed("envelope is not valid utf-8".into()))?;

    let root = element_open_tag(doc, "s:Envelope")?;
    let envelope_ns = attribute_value(root, "xmlns:s")?;
    let addressing_ns = attribute_value(root, "xmlns:a")?;
    let version = ProtocolVersion::from_namespaces(envelope_ns, addressing_ns).ok_or_else(|| {
        EncodingError::Malformed(format!(
            "unrecognized envelope namespaces {envelope_ns:?} / {addressing_ns:?}"
        ))
    })?;

    let header_section = element_content(doc, "s:Header")?;
    let mut header_bytes = 0usize;
    let mut read_header = |tag: &str, required: bool| -> Result<Option<String>> {
        match element_content(header_section, tag) {
            Ok(raw) => {
                let value = unescape_text(raw)?;
                quotas.check_string(value.len())?;
                header_bytes += value.len();
                quotas.check_header_size(header_bytes)?;
                Ok(Some(value))
            }
            Err(_) if !required => Ok(None),
            Err(err) => Err(err),
        }
    };

    let action = read_header("a:Action", true)?.unwrap_or_default();
    let message_id = read_header("a:MessageID", true)?.unwrap_or_default();
    let relates_to = read_header("a:RelatesTo", false)?;
    let to = read_header("a:To", false)?;

    let body_raw = element_content(doc, "s:Body")?;
    let body = if body_raw.is_empty() {
        Body::Empty
    } else {
        Body::Buffered(body_raw.as_bytes().to_vec().into())
    };

    let headers = MessageHeaders {
        to,
        action,
        message_id,
        relates_to,
    };
    Ok((version, headers, body))
}

fn push_header(out: &mut Vec<u8>, tag: &str, value: &str) {
    out.extend_from_slice(format!("<{tag}>{}</{tag}>", escape_text(value)).as_bytes());
}

/// The full open tag of `name`, attributes included, without brackets.
fn element_open_tag<'a>(doc: &'a str, name: &str) -> Result<&'a str> {
    let open = format!("<{name}");
    let start = doc
        .find(&open)
        .ok_or_else(|| EncodingError::Malformed(format!("missing <{name}> element")))?;
    let rest = &doc[start..];
    let end = rest
        .find('>')
        .ok_or_else(|| EncodingError::Malformed(format!("unterminated <{name}> tag")))?;
    Ok(&rest[..end])
}

/// Raw text between `<name ...>` and `</name>`.
fn element_content<'a>(doc: &'a str, name: &str) -> Result<&'a str> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let start = doc
        .find(&open)
        .ok_or_else(|| EncodingError::Malformed(format!("missing <{name}> element")))?;
    let after_open = &doc[start..];
    let open_end = after_open
        .find('>')
        .ok_or_else(|| EncodingError::Malformed(format!("unterminated <{name}> tag")))?;
    let content = &after_open[open_end + 1..];
    let close_at = content
        .find(&close)
        .ok_or_else(|| EncodingError::Malformed(format!("missing {close} close tag")))?;
    Ok(&content[..close_at])
}

fn attribute_value<'a>(tag: &'a str, name: &str) -> Result<&'a str> {
    let needle = format!("{name}=\"");
    let start = tag
        .find(&needle)
        .ok_or_else(|| EncodingError::Malformed(format!("missing {name} attribute")))?;
    let rest = &tag[start + needle.len()..];
    let end = rest
        .find('"')
        .ok_or_else(|| EncodingError::Malformed(format!("unterminated {name} attribute")))?;
    Ok(&rest[..end])
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_text(value: &str) -> Result<String> {
    if !value.contains('&') {
        return Ok(value.to_owned());
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        for (entity, ch) in [("&amp;", '&'), ("&lt;", '<'), ("&gt;", '>')] {
            if let Some(tail) = rest.strip_prefix(entity) {
                out.push(ch);
                rest = tail;
                break;
            }
        }
        if rest.starts_with('&') {
            return Err(EncodingError::Malformed(format!(
                "unrecognized entity at {:?}",
                &rest[..rest.len().min(8)]
            )));
        }
    }
    out.push_str(rest);
    Ok(out)
}
