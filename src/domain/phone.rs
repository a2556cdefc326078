use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;

const COUNTRY_CODE: &str = "234";

/// A subscriber number in canonical `+234XXXXXXXXXX` form.
///
/// Carriers send `0803...`, `234803...` or `+234803...` for the same line;
/// all of them map to one `Msisdn` so sessions and PIN records never split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Msisdn(String);

impl Msisdn {
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        let digits = cleaned.trim_start_matches('+');
        if digits.is_empty() || digits.contains('+') {
            return Err(GatewayError::ValidationError(format!(
                "Invalid phone number: {raw:?}"
            )));
        }

        let canonical = if cleaned.starts_with(&format!("+{COUNTRY_CODE}")) {
            cleaned
        } else if let Some(local) = cleaned.strip_prefix('0') {
            format!("+{COUNTRY_CODE}{local}")
        } else {
            format!("+{digits}")
        };
        Ok(Self(canonical))
    }

    /// Canonical form, with the leading `+`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits only, as the ledger API expects them.
    pub fn digits(&self) -> &str {
        self.0.trim_start_matches('+')
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_carrier_formats_canonicalize_identically() {
        let expected = "+2348031234567";
        for raw in ["08031234567", "2348031234567", "+2348031234567", " +234 803-123-4567 "] {
            assert_eq!(Msisdn::parse(raw).unwrap().as_str(), expected, "input {raw}");
        }
    }

    #[test]
    fn test_foreign_numbers_get_plus_prefix() {
        assert_eq!(Msisdn::parse("447700900123").unwrap().as_str(), "+447700900123");
    }

    #[test]
    fn test_digits_drop_plus() {
        assert_eq!(Msisdn::parse("08031234567").unwrap().digits(), "2348031234567");
    }

    #[test]
    fn test_empty_or_garbage_rejected() {
        assert!(Msisdn::parse("").is_err());
        assert!(Msisdn::parse("   ").is_err());
        assert!(Msisdn::parse("abc").is_err());
        assert!(Msisdn::parse("+").is_err());
        assert!(Msisdn::parse("234+803").is_err());
    }
}
