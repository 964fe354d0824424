//! Local side of the engine: the ERP's own entity tables.

use async_trait::async_trait;

use crate::models::{LocalRecord, StatusCounts};

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    /// The record was rejected before it reached storage.
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Stored data could not be read back.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Whether an upsert inserted a new row or changed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Reader/writer for the ERP's entity tables.
///
/// Writes are record-at-a-time and independently committed: a failure on
/// one record never rolls back records written before it.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn fetch_all(&self, table: &str) -> Result<Vec<LocalRecord>, LocalStoreError>;

    async fn upsert(
        &self,
        table: &str,
        record: &LocalRecord,
    ) -> Result<UpsertOutcome, LocalStoreError>;

    /// Flags an existing row as failing to sync. Unknown keys are ignored.
    async fn mark_error(&self, table: &str, key: &str, reason: &str)
        -> Result<(), LocalStoreError>;

    async fn count_by_status(&self, table: &str) -> Result<StatusCounts, LocalStoreError>;
}
