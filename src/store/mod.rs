pub mod db;

use crate::audit::{AuditScore, PageConfig, PageFilter};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored record could not be encoded or decoded: {0}")]
    Encoding(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::InvalidColumnType(..) => StoreError::Encoding(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

/// Persistence consumed by the audit pipeline.
pub trait Store: Send + Sync {
    fn find_pages(&self, filter: &PageFilter) -> Result<Vec<PageConfig>, StoreError>;

    fn find_page_by_id(&self, id: &str) -> Result<Option<PageConfig>, StoreError>;

    /// Append a score and return its id. Scores are never updated.
    fn insert_score(&self, score: &AuditScore) -> Result<String, StoreError>;

    /// Oldest first.
    fn find_scores_by_page(&self, page_id: &str) -> Result<Vec<AuditScore>, StoreError>;
}
