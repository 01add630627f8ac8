use std::fmt;

use crate::error::{EncodingError, Result};

/// Envelope dialect of the wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeVersion {
    Soap11,
    Soap12,
}

impl EnvelopeVersion {
    /// XML namespace identifying this envelope version.
    pub fn namespace(self) -> &'static str {
        match self {
            EnvelopeVersion::Soap11 => "http://schemas.xmlsoap.org/soap/envelope/",
            EnvelopeVersion::Soap12 => "http://www.w3.org/2003/05/soap-envelope",
        }
    }

    fn code(self) -> u8 {
        match self {
            EnvelopeVersion::Soap11 => 1,
            EnvelopeVersion::Soap12 => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EnvelopeVersion::Soap11),
            2 => Some(EnvelopeVersion::Soap12),
            _ => None,
        }
    }

    fn from_namespace(ns: &str) -> Option<Self> {
        [EnvelopeVersion::Soap11, EnvelopeVersion::Soap12]
            .into_iter()
            .find(|v| v.namespace() == ns)
    }
}

impl fmt::Display for EnvelopeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeVersion::Soap11 => write!(f, "Soap11"),
            EnvelopeVersion::Soap12 => write!(f, "Soap12"),
        }
    }
}

/// Addressing dialect of the message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingVersion {
    /// WS-Addressing 1.0.
    V10,
    /// WS-Addressing August 2004.
    V200408,
}

impl AddressingVersion {
    /// XML namespace identifying this addressing version.
    pub fn namespace(self) -> &'static str {
        match self {
            AddressingVersion::V10 => "http://www.w3.org/2005/08/addressing",
            AddressingVersion::V200408 => "http://schemas.xmlsoap.org/ws/2004/08/addressing",
        }
    }

    fn code(self) -> u8 {
        match self {
            AddressingVersion::V10 => 1,
            AddressingVersion::V200408 => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AddressingVersion::V10),
            2 => Some(AddressingVersion::V200408),
            _ => None,
        }
    }

    fn from_namespace(ns: &str) -> Option<Self> {
        [AddressingVersion::V10, AddressingVersion::V200408]
            .into_iter()
            .find(|v| v.namespace() == ns)
    }
}

impl fmt::Display for AddressingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressingVersion::V10 => write!(f, "Addressing10"),
            AddressingVersion::V200408 => write!(f, "Addressing200408"),
        }
    }
}

/// The envelope + addressing version pair an encoder speaks.
///
/// Fixed per encoder; a message declaring a different pair is rejected
/// both on encode and on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub envelope: EnvelopeVersion,
    pub addressing: AddressingVersion,
}

impl ProtocolVersion {
    /// SOAP 1.2 with WS-Addressing 1.0, the default pair.
    pub const SOAP12_ADDRESSING10: Self = Self {
        envelope: EnvelopeVersion::Soap12,
        addressing: AddressingVersion::V10,
    };

    /// SOAP 1.1 with WS-Addressing 1.0.
    pub const SOAP11_ADDRESSING10: Self = Self {
        envelope: EnvelopeVersion::Soap11,
        addressing: AddressingVersion::V10,
    };

    /// SOAP 1.2 with WS-Addressing August 2004.
    pub const SOAP12_ADDRESSING200408: Self = Self {
        envelope: EnvelopeVersion::Soap12,
        addressing: AddressingVersion::V200408,
    };

    /// Single-byte code used by the binary encoding.
    pub fn wire_code(self) -> u8 {
        (self.envelope.code() << 4) | self.addressing.code()
    }

    /// Decode the binary version code.
    pub fn from_wire_code(code: u8) -> Option<Self> {
        Some(Self {
            envelope: EnvelopeVersion::from_code(code >> 4)?,
            addressing: AddressingVersion::from_code(code & 0x0F)?,
        })
    }

    /// Resolve a namespace pair from an XML envelope.
    pub fn from_namespaces(envelope_ns: &str, addressing_ns: &str) -> Option<Self> {
        Some(Self {
            envelope: EnvelopeVersion::from_namespace(envelope_ns)?,
            addressing: AddressingVersion::from_namespace(addressing_ns)?,
        })
    }

    /// Fail fast unless `declared` equals this version.
    pub fn verify(self, declared: ProtocolVersion) -> Result<()> {
        if self != declared {
            return Err(EncodingError::VersionMismatch {
                ours: self,
                theirs: declared,
            });
        }
        Ok(())
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::SOAP12_ADDRESSING10
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.envelope, self.addressing)
    }
}
