/// Bounds enforced on the decode path.
///
/// Protects a receiver from unbounded memory use by a malicious or
/// broken peer. Supplied by the binding configuration; every encoder
/// enforces them while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderQuotas {
    /// Maximum size of a whole serialized message.
    pub max_message_size: usize,
    /// Maximum combined size of the header section.
    pub max_header_size: usize,
    /// Maximum length of any single decoded string value.
    pub max_string_len: usize,
}

impl Default for ReaderQuotas {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            max_header_size: 16 * 1024,
            max_string_len: 8 * 1024,
        }
    }
}

impl ReaderQuotas {
    /// Check one decoded string value against the per-string bound.
    pub fn check_string(&self, len: usize) -> crate::Result<()> {
        if len > self.max_string_len {
            return Err(crate::EncodingError::QuotaExceeded {
                quota: "string length",
                limit: self.max_string_len,
                actual: len,
            });
        }
        Ok(())
    }

    /// Check the accumulated header section size.
    pub fn check_header_size(&self, len: usize) -> crate::Result<()> {
        if len > self.max_header_size {
            return Err(crate::EncodingError::QuotaExceeded {
                quota: "header size",
                limit: self.max_header_size,
                actual: len,
            });
        }
        Ok(())
    }

    /// Check the whole-message size.
    pub fn check_message_size(&self, len: usize) -> crate::Result<()> {
        if len > self.max_message_size {
            return Err(crate::EncodingError::QuotaExceeded {
                quota: "message size",
                limit: self.max_message_size,
                actual: len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered() {
        let quotas = ReaderQuotas::default();
        assert!(quotas.max_string_len <= quotas.max_header_size);
        assert!(quotas.max_header_size <= quotas.max_message_size);
    }

    #[test]
    fn checks_reject_over_limit() {
        let quotas = ReaderQuotas {
            max_message_size: 100,
            max_header_size: 50,
            max_string_len: 10,
        };
        assert!(quotas.check_string(10).is_ok());
        assert!(quotas.check_string(11).is_err());
        assert!(quotas.check_header_size(51).is_err());
        assert!(quotas.check_message_size(101).is_err());
    }
}
