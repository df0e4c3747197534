//! Error types for atlas-ingest
//!
//! Every failure on the write path is either permanent (the message can never
//! be applied, so it is acknowledged and dropped) or transient (the message is
//! handed back to the broker for redelivery).

use thiserror::Error;

/// Ingestion failure classification
#[derive(Debug, Error)]
pub enum IngestError {
    /// Message cannot be decoded or does not describe a valid update
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Storage or index unavailable
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl IngestError {
    /// Whether redelivery may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Transient(_))
    }
}

impl From<atlas_common::Error> for IngestError {
    fn from(err: atlas_common::Error) -> Self {
        match err {
            atlas_common::Error::MalformedEvent(msg) | atlas_common::Error::InvalidInput(msg) => {
                IngestError::Malformed(msg)
            }
            other => IngestError::Transient(other.to_string()),
        }
    }
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_classified() {
        let malformed: IngestError = atlas_common::Error::MalformedEvent("bad json".into()).into();
        assert!(!malformed.is_retryable());

        let invalid: IngestError = atlas_common::Error::InvalidInput("bad id".into()).into();
        assert!(!invalid.is_retryable());

        let db: IngestError = atlas_common::Error::Dependency("locked".into()).into();
        assert!(db.is_retryable());
    }
}
