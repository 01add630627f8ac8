//! The preamble handshake: initiator and acceptor roles.
//!
//! The initiator writes a version record, a via record, and a
//! content-type record, terminated by a preamble-end record, then waits
//! for the acceptor's acknowledgement. The acceptor reads and validates
//! the same run and answers with an acknowledgement or a fault record.
//! The two roles are complementary, not identical; only after both have
//! completed is the connection usable for message transfer.

use std::io::{Read, Write};

use tracing::debug;

use crate::error::{FramingError, Result};
use crate::reader::RecordReader;
use crate::record::Record;
use crate::writer::RecordWriter;

/// The framing protocol version this implementation speaks.
pub const FRAMING_VERSION: (u8, u8) = (1, 0);

const MAX_VIA_LEN: usize = 2048;
const MAX_CONTENT_TYPE_LEN: usize = 512;

/// What the initiator declares in its preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreambleSettings {
    /// The via address as the initiator intends to address it.
    pub via: String,
    /// Content type of the encoder the initiator will use.
    pub content_type: String,
}

/// What the acceptor learned from a validated preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreambleOffer {
    /// Peer framing version (validated compatible).
    pub version: (u8, u8),
    /// Declared via address.
    pub via: String,
    /// Declared content type.
    pub content_type: String,
}

/// Acceptor-side policy for validating an inbound preamble.
///
/// Rejections are turned into fault records naming the reason and
/// terminate the connection.
pub trait PreambleValidator {
    /// Can this endpoint decode the declared content type?
    fn supports_content_type(&self, content_type: &str) -> bool;

    /// Does the declared via resolve to a locally hosted endpoint?
    fn services_via(&self, via: &str) -> bool;
}

/// Run the initiator side of the preamble.
///
/// Writes the full preamble in one flush, then blocks for the acceptor's
/// acknowledgement. A fault record from the acceptor surfaces as
/// [`FramingError::Fault`].
pub fn initiate<R: Read, W: Write>(
    reader: &mut RecordReader<R>,
    writer: &mut RecordWriter<W>,
    settings: &PreambleSettings,
) -> Result<()> {
    validate_field(&settings.via, "via", MAX_VIA_LEN)?;
    validate_field(&settings.content_type, "content type", MAX_CONTENT_TYPE_LEN)?;

    writer.stage_record(&Record::Version {
        major: FRAMING_VERSION.0,
        minor: FRAMING_VERSION.1,
    })?;
    writer.stage_record(&Record::Via(settings.via.clone()))?;
    writer.stage_record(&Record::ContentType(settings.content_type.clone()))?;
    writer.stage_record(&Record::PreambleEnd)?;
    writer.flush_staged()?;

    match reader.read_record()? {
        Record::PreambleAck => {
            debug!(via = %settings.via, "preamble acknowledged");
            Ok(())
        }
        Record::Fault(reason) => Err(FramingError::Fault(reason)),
        other => Err(FramingError::UnexpectedRecord {
            expected: "preamble-ack",
            found: other.name(),
        }),
    }
}

/// Run the acceptor side of the preamble.
///
/// On validation failure a fault record naming the reason is written
/// before the error is returned; the caller is expected to drop the
/// connection.
pub fn accept<R: Read, W: Write>(
    reader: &mut RecordReader<R>,
    writer: &mut RecordWriter<W>,
    validator: &dyn PreambleValidator,
) -> Result<PreambleOffer> {
    let version = match reader.read_record()? {
        Record::Version { major, minor } => (major, minor),
        other => {
            return Err(fault(
                writer,
                FramingError::UnexpectedRecord {
                    expected: "version",
                    found: other.name(),
                },
            ))
        }
    };

    // Same major is required; a newer minor from the peer is acceptable.
    if version.0 != FRAMING_VERSION.0 {
        return Err(fault(
            writer,
            FramingError::UnsupportedVersion {
                major: version.0,
                minor: version.1,
                ours_major: FRAMING_VERSION.0,
                ours_minor: FRAMING_VERSION.1,
            },
        ));
    }

    let via = match reader.read_record()? {
        Record::Via(via) => via,
        other => {
            return Err(fault(
                writer,
                FramingError::UnexpectedRecord {
                    expected: "via",
                    found: other.name(),
                },
            ))
        }
    };

    let content_type = match reader.read_record()? {
        Record::ContentType(content_type) => content_type,
        other => {
            return Err(fault(
                writer,
                FramingError::UnexpectedRecord {
                    expected: "content-type",
                    found: other.name(),
                },
            ))
        }
    };

    match reader.read_record()? {
        Record::PreambleEnd => {}
        other => {
            return Err(fault(
                writer,
                FramingError::UnexpectedRecord {
                    expected: "preamble-end",
                    found: other.name(),
                },
            ))
        }
    }

    if !validator.services_via(&via) {
        return Err(fault(
            writer,
            FramingError::Fault(format!("via '{via}' is not hosted here")),
        ));
    }

    if !validator.supports_content_type(&content_type) {
        return Err(fault(
            writer,
            FramingError::Fault(format!("content type '{content_type}' not supported")),
        ));
    }

    writer.write_record(&Record::PreambleAck)?;
    debug!(%via, %content_type, "preamble accepted");

    Ok(PreambleOffer {
        version,
        via,
        content_type,
    })
}

// Best-effort: the peer may already be gone, and the validation error is
// the one worth reporting either way.
fn fault<W: Write>(writer: &mut RecordWriter<W>, err: FramingError) -> FramingError {
    let _ = writer.write_record(&Record::Fault(err.to_string()));
    err
}

fn validate_field(value: &str, what: &'static str, max: usize) -> Result<()> {
    if value.is_empty() {
        tracing::warn!(field = what, "preamble field is empty");
        return Err(FramingError::EmptyPreambleField { field: what });
    }
    if value.len() > max {
        tracing::warn!(field = what, len = value.len(), "preamble field out of bounds");
        return Err(FramingError::RecordTooLarge {
            size: value.len(),
            max,
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Cursor;
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;

    struct AllowAll;

    impl PreambleValidator for AllowAll {
        fn supports_content_type(&self, _content_type: &str) -> bool {
            true
        }
        fn services_via(&self, _via: &str) -> bool {
            true
        }
    }

    struct OnlyBinary;

    impl PreambleValidator for OnlyBinary {
        fn supports_content_type(&self, content_type: &str) -> bool {
            content_type == "application/vnd.wirechan.msgbin"
        }
        fn services_via(&self, _via: &str) -> bool {
            true
        }
    }

    struct NoSuchVia;

    impl PreambleValidator for NoSuchVia {
        fn supports_content_type(&self, _content_type: &str) -> bool {
            true
        }
        fn services_via(&self, _via: &str) -> bool {
            false
        }
    }

    fn settings() -> PreambleSettings {
        PreambleSettings {
            via: "tcp://127.0.0.1:9171".to_string(),
            content_type: "application/vnd.wirechan.msgbin".to_string(),
        }
    }

    fn split(stream: UnixStream) -> (RecordReader<UnixStream>, RecordWriter<UnixStream>) {
        let clone = stream.try_clone().unwrap();
        (RecordReader::new(clone), RecordWriter::new(stream))
    }

    #[test]
    fn successful_preamble_exchange() {
        let (left, right) = UnixStream::pair().unwrap();

        let acceptor = thread::spawn(move || {
            let (mut reader, mut writer) = split(left);
            accept(&mut reader, &mut writer, &AllowAll).unwrap()
        });

        let (mut reader, mut writer) = split(right);
        initiate(&mut reader, &mut writer, &settings()).unwrap();

        let offer = acceptor.join().unwrap();
        assert_eq!(offer.version, FRAMING_VERSION);
        assert_eq!(offer.via, "tcp://127.0.0.1:9171");
        assert_eq!(offer.content_type, "application/vnd.wirechan.msgbin");
    }

    #[test]
    fn unsupported_content_type_faults() {
        let (left, right) = UnixStream::pair().unwrap();

        let acceptor = thread::spawn(move || {
            let (mut reader, mut writer) = split(left);
            accept(&mut reader, &mut writer, &OnlyBinary)
        });

        let (mut reader, mut writer) = split(right);
        let cfg = PreambleSettings {
            content_type: "text/xml; charset=utf-8".to_string(),
            ..settings()
        };
        let initiator_result = initiate(&mut reader, &mut writer, &cfg);
        let acceptor_result = acceptor.join().unwrap();

        assert!(matches!(initiator_result, Err(FramingError::Fault(_))));
        assert!(matches!(acceptor_result, Err(FramingError::Fault(_))));
    }

    #[test]
    fn unknown_via_faults() {
        let (left, right) = UnixStream::pair().unwrap();

        let acceptor = thread::spawn(move || {
            let (mut reader, mut writer) = split(left);
            accept(&mut reader, &mut writer, &NoSuchVia)
        });

        let (mut reader, mut writer) = split(right);
        let initiator_result = initiate(&mut reader, &mut writer, &settings());

        assert!(matches!(initiator_result, Err(FramingError::Fault(msg)) if msg.contains("not hosted")));
        assert!(matches!(acceptor.join().unwrap(), Err(FramingError::Fault(_))));
    }

    #[test]
    fn version_major_mismatch_faults() {
        let (left, right) = UnixStream::pair().unwrap();

        let acceptor = thread::spawn(move || {
            let (mut reader, mut writer) = split(left);
            accept(&mut reader, &mut writer, &AllowAll)
        });

        let (mut reader, mut writer) = split(right);
        writer
            .write_record(&Record::Version { major: 9, minor: 0 })
            .unwrap();
        writer
            .write_record(&Record::Via("tcp://h:1".into()))
            .unwrap();

        assert!(matches!(
            acceptor.join().unwrap(),
            Err(FramingError::UnsupportedVersion { major: 9, .. })
        ));
        // Initiator observes the fault record.
        assert!(matches!(reader.read_record(), Ok(Record::Fault(_))));
    }

    #[test]
    fn newer_minor_version_accepted() {
        let (left, right) = UnixStream::pair().unwrap();

        let acceptor = thread::spawn(move || {
            let (mut reader, mut writer) = split(left);
            accept(&mut reader, &mut writer, &AllowAll)
        });

        let (mut reader, mut writer) = split(right);
        writer
            .write_record(&Record::Version {
                major: FRAMING_VERSION.0,
                minor: FRAMING_VERSION.1 + 3,
            })
            .unwrap();
        writer
            .write_record(&Record::Via("tcp://h:1".into()))
            .unwrap();
        writer
            .write_record(&Record::ContentType("text/xml".into()))
            .unwrap();
        writer.write_record(&Record::PreambleEnd).unwrap();

        let offer = acceptor.join().unwrap().unwrap();
        assert_eq!(offer.version.1, FRAMING_VERSION.1 + 3);
        assert_eq!(reader.read_record().unwrap(), Record::PreambleAck);
    }

    #[test]
    fn out_of_order_preamble_rejected() {
        let (left, right) = UnixStream::pair().unwrap();

        let acceptor = thread::spawn(move || {
            let (mut reader, mut writer) = split(left);
            accept(&mut reader, &mut writer, &AllowAll)
        });

        let (_reader, mut writer) = split(right);
        // Via before version is a protocol violation.
        writer
            .write_record(&Record::Via("tcp://h:1".into()))
            .unwrap();

        assert!(matches!(
            acceptor.join().unwrap(),
            Err(FramingError::UnexpectedRecord {
                expected: "version",
                ..
            })
        ));
    }

    #[test]
    fn disconnect_during_preamble_is_communication_error() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);

        let (mut reader, mut writer) = split(left);
        let err = accept(&mut reader, &mut writer, &AllowAll).unwrap_err();
        assert!(matches!(err, FramingError::ConnectionClosed));
        assert!(err.is_communication());
    }

    #[test]
    fn empty_via_rejected_before_any_io() {
        let mut reader = RecordReader::new(Cursor::new(Vec::<u8>::new()));
        let mut writer = RecordWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = PreambleSettings {
            via: String::new(),
            ..settings()
        };
        let err = initiate(&mut reader, &mut writer, &cfg).unwrap_err();
        assert!(matches!(
            err,
            FramingError::EmptyPreambleField { field: "via" }
        ));
    }

    #[test]
    fn empty_content_type_rejected_before_any_io() {
        let mut reader = RecordReader::new(Cursor::new(Vec::<u8>::new()));
        let mut writer = RecordWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = PreambleSettings {
            content_type: String::new(),
            ..settings()
        };
        let err = initiate(&mut reader, &mut writer, &cfg).unwrap_err();
        assert!(matches!(
            err,
            FramingError::EmptyPreambleField {
                field: "content type"
            }
        ));
    }

    #[test]
    fn oversized_via_rejected_before_any_io() {
        let mut reader = RecordReader::new(Cursor::new(Vec::<u8>::new()));
        let mut writer = RecordWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = PreambleSettings {
            via: "x".repeat(4096),
            ..settings()
        };
        let err = initiate(&mut reader, &mut writer, &cfg).unwrap_err();
        assert!(matches!(err, FramingError::RecordTooLarge { .. }));
    }
}
