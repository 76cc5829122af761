//! Driver tuning parameters.
//!
//! Parameters are the driver- or store-specific keys of a configuration
//! section (`color_weight`, `batch_size`, ...). Values may arrive as
//! numbers, booleans or strings, so the typed getters coerce strings such as
//! `"0.2"` or `"false"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Free-form key/value parameters attached to a configuration section.
///
/// # Example
///
/// ```
/// use pictor_core::Params;
///
/// let params = Params::new()
///     .with_field("color_weight", "0.2")
///     .with_field("batch_size", 64);
///
/// assert_eq!(params.get_f64("color_weight"), Some(0.2));
/// assert_eq!(params.get_i64("batch_size"), Some(64));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params {
    data: BTreeMap<String, Value>,
}

impl Params {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field. Chainable.
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.data.insert(key.into(), value.into());
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Gets a field as a string. Numbers and booleans are not converted.
    #[inline]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Gets a field as an f64, parsing string values.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Gets a field as an i64, parsing string values.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Gets a field as a bool. Accepts `true`/`false`, `1`/`0` and their
    /// string forms, plus `yes`/`no`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.data.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Reads an f64 field that must lie in `range`, or returns `default`.
    pub fn f64_in_range(
        &self,
        key: &str,
        range: std::ops::RangeInclusive<f64>,
        default: f64,
    ) -> Result<f64> {
        if !self.contains_key(key) {
            return Ok(default);
        }
        match self.get_f64(key) {
            Some(v) if range.contains(&v) => Ok(v),
            _ => Err(Error::Configuration(format!(
                "{} must be a number in [{}, {}], got {}",
                key,
                range.start(),
                range.end(),
                self.data[key]
            ))),
        }
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }
}
