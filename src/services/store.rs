//! Record storage seam used by the ingestion and distribution orchestrators

use async_trait::async_trait;
use thiserror::Error;

use crate::types::DebtorInput;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint hit, reported with the offending field and value
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait DebtorStore: Send + Sync {
    /// Insert a debtor with its relations and bank accounts; returns the new id
    async fn create_debtor(&self, input: &DebtorInput) -> Result<i64, StoreError>;

    /// Set the collector of every listed debtor in one statement; returns rows touched
    async fn assign_collector(&self, debtor_ids: &[i64], collector_id: &str) -> Result<u64, StoreError>;
}
