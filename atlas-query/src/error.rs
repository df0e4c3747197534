//! Error types for atlas-query
//!
//! Callers see three outcomes only: the single requested item does not exist,
//! the query ran out of time, or something failed. Which internal step failed
//! is logged, not reported.

use atlas_common::Id;
use std::time::Duration;
use thiserror::Error;

pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    /// Single-item query matched nothing the application may see
    #[error("Content not found: {0}")]
    NotFound(Id),

    /// Outer time bound exceeded
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure (storage, index, search)
    #[error("Query failed: {0}")]
    Failed(String),
}

impl From<atlas_common::Error> for QueryError {
    fn from(err: atlas_common::Error) -> Self {
        QueryError::Failed(err.to_string())
    }
}

impl QueryError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, QueryError::NotFound(_))
    }
}
