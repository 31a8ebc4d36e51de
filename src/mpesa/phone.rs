//! Kenyan subscriber number canonicalization.
//!
//! The gateway only accepts `254XXXXXXXXX`. Normalization is a pure
//! function over the raw user input.

use crate::mpesa::error::MpesaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A subscriber number in canonical `254XXXXXXXXX` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Canonicalize a raw phone number.
    ///
    /// Accepted forms, in precedence order:
    /// - 12 digits starting with `254` (returned as-is)
    /// - 10 digits starting with `0` (leading zero replaced with `254`)
    /// - exactly 9 digits (prefixed with `254`)
    ///
    /// Everything else is rejected.
    pub fn normalize(raw: &str) -> Result<Self, MpesaError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.len() == 12 && digits.starts_with("254") {
            return Ok(PhoneNumber(digits));
        }
        if digits.len() == 10 && digits.starts_with('0') {
            return Ok(PhoneNumber(format!("254{}", &digits[1..])));
        }
        if digits.len() == 9 {
            return Ok(PhoneNumber(format!("254{}", digits)));
        }

        Err(MpesaError::Validation {
            message: "Invalid phone number format. Use format: 0712345678".to_string(),
            field: Some(raw.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_table() {
        let cases = [
            ("0712345678", Some("254712345678")),
            ("254712345678", Some("254712345678")),
            ("712345678", Some("254712345678")),
            ("+254712345678", Some("254712345678")),
            ("0712 345 678", Some("254712345678")),
            ("0712-345-678", Some("254712345678")),
            ("abc", None),
            ("", None),
            ("12345", None),
            ("07123456789", None),     // 11 digits
            ("2547123456789", None),   // 13 digits
            ("1712345678", None),      // 10 digits without leading zero
        ];

        for (raw, expected) in cases {
            match expected {
                Some(canonical) => {
                    let phone = PhoneNumber::normalize(raw)
                        .unwrap_or_else(|e| panic!("{:?} should normalize: {}", raw, e));
                    assert_eq!(phone.as_str(), canonical, "input {:?}", raw);
                }
                None => {
                    assert!(PhoneNumber::normalize(raw).is_err(), "input {:?}", raw);
                }
            }
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = PhoneNumber::normalize("0712345678").unwrap();
        let twice = PhoneNumber::normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }
}
