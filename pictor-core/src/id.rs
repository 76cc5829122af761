//! Record identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Length of the hex rendering of a [`RecordId`].
pub const ID_HEX_LEN: usize = 32;

/// Opaque 128-bit record identifier, rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u128);

impl RecordId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Builds an id from its raw value.
    #[inline]
    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    #[inline]
    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// Parses a hex id, rejecting anything that is not exactly 32 hex digits.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != ID_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument(format!("malformed record id: {:?}", s)));
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| Error::InvalidArgument(format!("malformed record id {:?}: {}", s, e)))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Anything that names a record: a [`RecordId`] or its hex rendering.
///
/// Lets facade calls take ids as returned by `insert` or as plain strings.
pub trait IntoRecordId {
    fn into_record_id(self) -> Result<RecordId>;
}

impl IntoRecordId for RecordId {
    fn into_record_id(self) -> Result<RecordId> {
        Ok(self)
    }
}

impl IntoRecordId for &RecordId {
    fn into_record_id(self) -> Result<RecordId> {
        Ok(*self)
    }
}

impl IntoRecordId for &str {
    fn into_record_id(self) -> Result<RecordId> {
        RecordId::parse(self)
    }
}

impl IntoRecordId for &String {
    fn into_record_id(self) -> Result<RecordId> {
        RecordId::parse(self)
    }
}

impl IntoRecordId for String {
    fn into_record_id(self) -> Result<RecordId> {
        RecordId::parse(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_padded_hex() {
        let id = RecordId::from_u128(0xabc);
        assert_eq!(id.to_string(), "00000000000000000000000000000abc");
        assert_eq!(id.to_string().len(), ID_HEX_LEN);
    }

    #[test]
    fn test_parse_accepts_uppercase() {
        let id: RecordId = "0000000000000000000000000000ABCD".parse().unwrap();
        assert_eq!(id.as_u128(), 0xabcd);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "abc", "zz000000000000000000000000000000", "+0000000000000000000000000000001"] {
            assert!(matches!(RecordId::parse(bad), Err(Error::InvalidArgument(_))), "{bad}");
        }
        // one char too long
        assert!(RecordId::parse(&"0".repeat(33)).is_err());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }

    #[test]
    fn test_into_record_id() {
        let id = RecordId::generate();
        assert_eq!(id.to_string().into_record_id().unwrap(), id);
        assert_eq!((&id).into_record_id().unwrap(), id);
        assert!(matches!("nope".into_record_id(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_serde_as_string() {
        let id = RecordId::from_u128(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0000000000000000000000000000002a\"");
        let back: RecordId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
