//! Error types for TaskFlow sync data types.

use thiserror::Error;

/// Errors produced while encoding, decoding or validating sync types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed.
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// A peer identifier was empty or contained whitespace.
    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::InvalidPeerId("".into());
        assert_eq!(err.to_string(), "invalid peer id: \"\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
