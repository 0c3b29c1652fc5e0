//! Error types for dataset import and catalog indexing

use thiserror::Error;

/// Result type alias for PIXLISE operations
pub type Result<T> = std::result::Result<T, PixliseError>;

/// Main error type for PIXLISE
#[derive(Error, Debug)]
pub enum PixliseError {
    /// A file name does not follow the 58 character product identifier grammar
    #[error("Invalid product ID \"{name}\": {reason}")]
    InvalidProductId { name: String, reason: String },

    /// File content contradicts its declared structure
    #[error("Invalid format in {file}: {reason}")]
    InvalidFormat { file: String, reason: String },

    /// One parsed artifact refers to a PMC or file missing from another
    #[error("Cross-reference error: {0}")]
    CrossReference(String),

    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("Storage error for {container}/{key}: {reason}")]
    Storage {
        container: String,
        key: String,
        reason: String,
    },

    #[error("Malformed trigger: {0}")]
    TriggerMalformed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PixliseError {
    pub fn invalid_format(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            file: file.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            container: container.into(),
            key: key.into(),
        }
    }

    pub fn storage(
        container: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Storage {
            container: container.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True when the error means "the object is absent", which the reducers
    /// and the debounce store treat as empty state.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_discriminator() {
        let err = PixliseError::not_found("datasets", "Datasets/123/summary.json");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Object not found: datasets/Datasets/123/summary.json"
        );

        let err = PixliseError::storage("datasets", "x", "connection reset");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_invalid_format_message_names_file() {
        let err = PixliseError::invalid_format("beam.csv", "row 3: expected 6 columns");
        assert_eq!(
            err.to_string(),
            "Invalid format in beam.csv: row 3: expected 6 columns"
        );
    }

    #[test]
    fn test_serde_error_converts() {
        let err: PixliseError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, PixliseError::Serialization(_)));
    }
}
