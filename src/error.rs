//! Error types for chip identification.
//!
//! Decode-level ambiguity in the instruction stream is never an error;
//! only a bad firmware image, an unusable database, or an empty database
//! surface here.

use thiserror::Error;

/// Primary error type for chip identification.
#[derive(Debug, Error)]
pub enum IdentifyError {
    /// The firmware buffer is empty or cannot be scanned.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What is wrong with the image
        message: String,
    },

    /// Matching ran, but the database had nothing to test against.
    #[error("No candidates: {reason}")]
    NoCandidates {
        /// Why there was nothing to match
        reason: String,
    },

    /// The database read interface failed.
    #[error("Database unavailable: {message}")]
    DatabaseUnavailable {
        /// Underlying failure
        message: String,
    },

    /// IO error while reading a firmware file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Offending setting
        message: String,
    },
}

impl IdentifyError {
    /// Shorthand for [`IdentifyError::DatabaseUnavailable`].
    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseUnavailable {
            message: message.into(),
        }
    }

    /// True for the "ran fine, nothing to compare against" outcome.
    pub fn is_no_candidates(&self) -> bool {
        matches!(self, Self::NoCandidates { .. })
    }
}

/// Result type alias for identification operations.
pub type Result<T> = std::result::Result<T, IdentifyError>;

/// Extension trait for turning foreign errors into database failures.
pub trait ResultExt<T> {
    /// Wrap the error as [`IdentifyError::DatabaseUnavailable`] with context.
    ///
    /// # Errors
    ///
    /// Returns the wrapped error when `self` is `Err`.
    fn db_context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn db_context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| IdentifyError::DatabaseUnavailable {
            message: format!("{}: {}", msg.into(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IdentifyError::InvalidInput {
            message: "firmware image is empty".into(),
        };
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_db_context() {
        let res: std::result::Result<(), String> = Err("disk on fire".into());
        let err = res.db_context("opening chips.db").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("chips.db"));
        assert!(msg.contains("disk on fire"));
        assert!(!err.is_no_candidates());
    }

    #[test]
    fn test_no_candidates_flag() {
        let err = IdentifyError::NoCandidates {
            reason: "database is empty".into(),
        };
        assert!(err.is_no_candidates());
    }
}
