//! Error types for Sluice.

use thiserror::Error;

use crate::ratelimit::StorageError;

/// Main error type for Sluice operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid limiter or backend configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend failed while reading or writing state for `key`
    #[error("Storage error for key '{key}': {source}")]
    Storage {
        /// The rate limit key being evaluated
        key: String,
        /// The underlying backend failure
        #[source]
        source: StorageError,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a backend failure with the key it occurred on.
    pub fn storage(key: &str, source: StorageError) -> Self {
        Error::Storage {
            key: key.to_string(),
            source,
        }
    }

    /// Returns `true` if this error came from the backend.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage { .. })
    }
}

/// Result type alias for Sluice operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_carries_key() {
        let err = Error::storage("benjamin", StorageError::Unavailable("connection refused".into()));

        assert!(err.is_storage());
        assert_eq!(
            err.to_string(),
            "Storage error for key 'benjamin': Backend unavailable: connection refused"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("rate must be positive".into());
        assert!(!err.is_storage());
        assert_eq!(err.to_string(), "Configuration error: rate must be positive");
    }
}
