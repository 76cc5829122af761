//! Error types for Pictor operations.

use thiserror::Error;

/// Result type alias using Pictor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during Pictor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing configuration (unknown driver, invalid namespace,
    /// unreachable storage path, out-of-range tuning value).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The input could not be read or decoded into a feature vector.
    #[error("feature extraction failed for {input}: {reason}")]
    FeatureExtraction { input: String, reason: String },

    /// Operation on a missing record or database.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed id, zero `top_k`, incompatible feature vector, bad buffer.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown invoke command, or a driver lacking the requested capability.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The database handle was already closed.
    #[error("database handle is closed")]
    ClosedHandle,

    /// Backend failure in a record store (I/O, SQLite, log corruption).
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn extraction(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FeatureExtraction {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(format!("sqlite: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::extraction("lena.ppm", "unsupported magic number");
        assert_eq!(
            err.to_string(),
            "feature extraction failed for lena.ppm: unsupported magic number"
        );
        assert_eq!(Error::ClosedHandle.to_string(), "database handle is closed");
    }
}
