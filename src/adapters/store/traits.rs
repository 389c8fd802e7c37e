//! Row store abstraction
//!
//! The row store owns row and batch lifecycle state. Every state change goes
//! through a guarded, single-transaction operation so overlapping invocations
//! never both win the same transition.

use crate::domain::{
    Batch, BatchFilter, BatchId, DeliveryRecord, GroupingKey, Result, Row, RowFailure, RowId,
    StateCounts,
};
use async_trait::async_trait;
use chrono::Duration;

/// Row store client
///
/// Implementations must keep each operation atomic. Connectivity problems
/// surface as retryable [`RowStoreError`](crate::domain::RowStoreError)s.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Short backend name for logs and the status command
    fn backend_name(&self) -> &str;

    /// Test the row store connection
    async fn test_connection(&self) -> Result<()>;

    /// Create tables and indexes if they do not exist
    async fn ensure_schema(&self) -> Result<()>;

    /// Distinct grouping keys that have `ready` rows, oldest row first
    ///
    /// Sites are compared after stripping
    /// [`SITE_PADDING`](crate::domain::ids::SITE_PADDING); rows with a blank
    /// site never form a key.
    async fn ready_grouping_keys(&self) -> Result<Vec<GroupingKey>>;

    /// `ready` rows with a blank site become `failed` with `reason`
    ///
    /// Returns the ids of the rows changed.
    async fn fail_unkeyed_rows(&self, reason: &str) -> Result<Vec<RowId>>;

    /// Up to `limit` `ready` rows of a key, ordered by `created_at` then id
    async fn fetch_ready(&self, key: &GroupingKey, limit: usize) -> Result<Vec<Row>>;

    /// Atomically moves `rows` from `ready` to `selected` under a fresh batch id
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ConcurrentClaim` and changes nothing if any row
    /// was no longer `ready` or the derived batch id was taken meanwhile.
    async fn claim(&self, key: &GroupingKey, rows: &[RowId]) -> Result<Batch>;

    /// Batches in `staged`, oldest first
    async fn staged_batches(&self, limit: usize) -> Result<Vec<Batch>>;

    /// Rows of a batch that are still `selected`
    async fn load_batch_rows(&self, batch_id: &BatchId) -> Result<Vec<Row>>;

    /// Takes the delivery lease for a batch
    ///
    /// Succeeds when no record exists, the previous attempt failed, or a
    /// `retrying` record is older than `lease_timeout`.
    ///
    /// # Errors
    ///
    /// - `BridgeError::AlreadyDelivered` when the record says `delivered`
    /// - `BridgeError::ConcurrentClaim` when another run holds a fresh lease
    async fn begin_delivery(&self, record: &DeliveryRecord, lease_timeout: Duration)
        -> Result<()>;

    /// Stores the settled outcome of the lease held by `record.run_id`
    async fn complete_delivery(&self, record: &DeliveryRecord) -> Result<()>;

    async fn delivery_record(&self, batch_id: &BatchId) -> Result<Option<DeliveryRecord>>;

    /// `selected` rows become `delivered`, the batch `staged` becomes `delivered`
    ///
    /// A no-op when the batch is already past `staged`.
    async fn mark_delivered(&self, batch_id: &BatchId) -> Result<()>;

    /// Listed `selected` rows become `failed` with their reasons
    ///
    /// The batch becomes `failed` once none of its rows is `selected`.
    /// Rows that already left `selected` are left untouched.
    async fn mark_failed(&self, batch_id: &BatchId, failures: &[RowFailure]) -> Result<()>;

    /// `delivered` batch becomes `archived`; no-op otherwise
    async fn mark_archived(&self, batch_id: &BatchId) -> Result<()>;

    /// Batches matching `filter`, newest first
    async fn list_batches(&self, filter: &BatchFilter, limit: usize) -> Result<Vec<Batch>>;

    /// Row and batch totals per state
    async fn state_counts(&self) -> Result<StateCounts>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_store_is_object_safe() {
        fn _assert(_: &dyn RowStore) {}
    }
}
