//! Feature vectors produced by feature drivers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A feature vector extracted from an image.
///
/// The `tag` names the driver configuration that produced the values; two
/// vectors can only be compared when their tags are equal. Vectors are
/// immutable once produced and owned independently of any database handle.
///
/// # Example
///
/// ```
/// use pictor_core::FeatureVector;
///
/// let fv = FeatureVector::new("color/v1", vec![0.5, 0.5]);
/// let bytes = fv.to_bytes();
/// assert_eq!(FeatureVector::from_bytes(&bytes).unwrap(), fv);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    tag: String,
    values: Vec<f32>,
}

impl FeatureVector {
    /// Creates a feature vector with the given driver tag.
    #[inline]
    pub fn new(tag: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            tag: tag.into(),
            values,
        }
    }

    /// Returns the tag of the driver configuration that produced this vector.
    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the raw values.
    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Returns the number of values.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fails unless `other` was produced by the same driver configuration.
    pub fn ensure_comparable(&self, other: &FeatureVector) -> Result<()> {
        if self.tag != other.tag || self.values.len() != other.values.len() {
            return Err(Error::InvalidArgument(format!(
                "feature {} (dim {}) is not comparable with {} (dim {})",
                self.tag,
                self.values.len(),
                other.tag,
                other.values.len()
            )));
        }
        Ok(())
    }

    /// Serializes to the opaque external buffer.
    ///
    /// Layout: `[tag_len:u16][tag:utf8][count:u32][values:f32*count]`, little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let tag = self.tag.as_bytes();
        let mut out = Vec::with_capacity(2 + tag.len() + 4 + self.values.len() * 4);
        out.extend_from_slice(&(tag.len() as u16).to_le_bytes());
        out.extend_from_slice(tag);
        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Parses a buffer produced by [`FeatureVector::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| Error::InvalidArgument(format!("corrupt feature buffer: {}", what));

        let tag_len = bytes
            .get(..2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
            .ok_or_else(|| corrupt("missing tag length"))?;
        let tag_end = 2 + tag_len;
        let tag = bytes
            .get(2..tag_end)
            .ok_or_else(|| corrupt("truncated tag"))?;
        let tag = std::str::from_utf8(tag).map_err(|_| corrupt("tag is not utf-8"))?;

        let count = bytes
            .get(tag_end..tag_end + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(|| corrupt("missing value count"))?;
        let body = &bytes[tag_end + 4..];
        if body.len() != count * 4 {
            return Err(corrupt(&format!(
                "expected {} value bytes, found {}",
                count * 4,
                body.len()
            )));
        }

        let values = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self::new(tag, values))
    }

    /// Returns the text form of this vector (base64 of [`to_bytes`](Self::to_bytes)).
    pub fn to_feature_string(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Parses the text form produced by [`to_feature_string`](Self::to_feature_string).
    pub fn from_feature_string(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| Error::InvalidArgument(format!("invalid feature string: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_layout() {
        let fv = FeatureVector::new("ab", vec![1.0]);
        let bytes = fv.to_bytes();
        assert_eq!(&bytes[..2], &2u16.to_le_bytes());
        assert_eq!(&bytes[2..4], b"ab");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_from_bytes_rejects_truncation() {
        let bytes = FeatureVector::new("color/v1", vec![0.25, 0.75]).to_bytes();
        for cut in [0, 1, 5, bytes.len() - 1] {
            assert!(matches!(
                FeatureVector::from_bytes(&bytes[..cut]),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_feature_string() {
        let fv = FeatureVector::new("idf/v1", vec![3.0, 0.0, 1.0]);
        let s = fv.to_feature_string();
        assert_eq!(FeatureVector::from_feature_string(&s).unwrap(), fv);
        assert!(FeatureVector::from_feature_string("not base64!").is_err());
    }

    #[test]
    fn test_ensure_comparable() {
        let a = FeatureVector::new("color/v1", vec![1.0, 0.0]);
        let b = FeatureVector::new("idf/v1", vec![1.0, 0.0]);
        let c = FeatureVector::new("color/v1", vec![1.0]);
        assert!(a.ensure_comparable(&a.clone()).is_ok());
        assert!(a.ensure_comparable(&b).is_err());
        assert!(a.ensure_comparable(&c).is_err());
    }
}
