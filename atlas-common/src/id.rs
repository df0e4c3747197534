//! Content identifiers
//!
//! An [`Id`] names one publisher's record of one piece of content. Ids are
//! strictly ordered 63-bit values; on the wire they travel as a compact
//! lowercase code built from digits and consonants (no vowels, so codes never
//! spell words).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

const ALPHABET: &[u8; 30] = b"0123456789bcdfghjkmnpqrstvwxyz";
const BASE: u64 = ALPHABET.len() as u64;

/// Largest representable id (fits a signed 64-bit storage column)
pub const MAX_ID: u64 = i64::MAX as u64;

/// Opaque, globally unique, strictly ordered content identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    /// Create an id from its numeric value
    ///
    /// # Errors
    /// Returns `InvalidInput` for values above [`MAX_ID`].
    pub fn new(value: u64) -> Result<Self> {
        if value > MAX_ID {
            return Err(Error::InvalidInput(format!("id {} out of range", value)));
        }
        Ok(Self(value))
    }

    /// Numeric value
    pub fn value(self) -> u64 {
        self.0
    }

    /// Storage representation (SQLite INTEGER)
    pub fn as_db(self) -> i64 {
        // MAX_ID guarantees the value fits
        self.0 as i64
    }

    /// Rebuild an id read from a storage column
    pub fn from_db(value: i64) -> Result<Self> {
        u64::try_from(value)
            .map_err(|_| Error::InvalidInput(format!("negative id {} in storage", value)))
            .and_then(Self::new)
    }

    /// Encode as the compact wire code
    pub fn to_code(self) -> String {
        if self.0 == 0 {
            return "0".to_string();
        }
        let mut value = self.0;
        let mut digits = Vec::new();
        while value > 0 {
            digits.push(ALPHABET[(value % BASE) as usize]);
            value /= BASE;
        }
        digits.reverse();
        // Alphabet is ASCII
        String::from_utf8(digits).unwrap_or_default()
    }

    /// Decode a wire code
    ///
    /// # Errors
    /// Returns `InvalidInput` for empty codes, characters outside the
    /// alphabet, or values that overflow [`MAX_ID`].
    pub fn from_code(code: &str) -> Result<Self> {
        if code.is_empty() {
            return Err(Error::InvalidInput("empty id code".to_string()));
        }
        let mut value: u64 = 0;
        for ch in code.bytes() {
            let digit = ALPHABET
                .iter()
                .position(|&a| a == ch)
                .ok_or_else(|| Error::InvalidInput(format!("invalid id code: {}", code)))?;
            value = value
                .checked_mul(BASE)
                .and_then(|v| v.checked_add(digit as u64))
                .ok_or_else(|| Error::InvalidInput(format!("id code overflows: {}", code)))?;
        }
        Self::new(value)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_code())
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_code(s)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_code())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Id::from_code(&code).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_of_small_values() {
        assert_eq!(Id::new(0).unwrap().to_code(), "0");
        assert_eq!(Id::new(9).unwrap().to_code(), "9");
        assert_eq!(Id::new(10).unwrap().to_code(), "b");
        assert_eq!(Id::new(29).unwrap().to_code(), "z");
        assert_eq!(Id::new(30).unwrap().to_code(), "10");
    }

    #[test]
    fn test_code_decodes_back() {
        for value in [1u64, 29, 30, 900, 123_456_789, MAX_ID] {
            let id = Id::new(value).unwrap();
            assert_eq!(Id::from_code(&id.to_code()).unwrap(), id);
        }
    }

    #[test]
    fn test_rejects_vowels_and_uppercase() {
        assert!(Id::from_code("cat").is_err());
        assert!(Id::from_code("B").is_err());
        assert!(Id::from_code("").is_err());
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(Id::new(MAX_ID + 1).is_err());
        assert!(Id::from_code("zzzzzzzzzzzzzzzz").is_err());
        assert!(Id::from_db(-1).is_err());
    }

    #[test]
    fn test_ordering_follows_numeric_value() {
        let a = Id::new(5).unwrap();
        let b = Id::new(500).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_serde_uses_code() {
        let id = Id::new(900).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"100\"");
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
