//! In-memory row store
//!
//! Holds rows, batches and delivery records behind one `Mutex`, so every
//! operation is trivially atomic. Used by the integration tests and by
//! `--dry-run` demos; it mirrors the PostgreSQL adapter's transition rules.

use crate::adapters::store::RowStore;
use crate::domain::ids::next_sequence;
use crate::domain::{
    Batch, BatchFilter, BatchId, BatchState, BridgeError, DeliveryOutcome, DeliveryRecord,
    GroupingKey, Result, Row, RowFailure, RowId, RowState, RowStoreError, StateCounts,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<RowId, Row>,
    /// Rows whose site is blank, with their state and error reason
    unkeyed: BTreeMap<RowId, (RowState, Option<String>)>,
    batches: Vec<Batch>,
    deliveries: HashMap<BatchId, DeliveryRecord>,
}

impl MemoryState {
    fn batch_mut(&mut self, batch_id: &BatchId) -> Result<&mut Batch> {
        self.batches
            .iter_mut()
            .find(|b| &b.batch_id == batch_id)
            .ok_or_else(|| unknown_batch(batch_id))
    }

    fn has_selected_rows(&self, batch_id: &BatchId) -> bool {
        self.rows
            .values()
            .any(|r| r.state == RowState::Selected && r.batch_id.as_ref() == Some(batch_id))
    }
}

fn unknown_batch(batch_id: &BatchId) -> BridgeError {
    RowStoreError::Inconsistent(format!("Unknown batch {batch_id}")).into()
}

/// Row store kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the database connection
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Adds a row as the upstream producer would
    pub fn insert_row(&self, row: Row) -> Result<()> {
        let mut state = self.lock()?;
        state.rows.insert(row.id, row);
        Ok(())
    }

    /// Adds a row with a blank site, as a faulty producer would
    pub fn insert_unkeyed_row(&self, id: RowId) -> Result<()> {
        self.lock()?.unkeyed.insert(id, (RowState::Ready, None));
        Ok(())
    }

    /// State and error reason of a row added by [`Self::insert_unkeyed_row`]
    pub fn unkeyed_row(&self, id: RowId) -> Result<Option<(RowState, Option<String>)>> {
        Ok(self.lock()?.unkeyed.get(&id).cloned())
    }

    /// Snapshot of one row
    pub fn row(&self, id: RowId) -> Result<Option<Row>> {
        Ok(self.lock()?.rows.get(&id).cloned())
    }

    /// Snapshot of every row
    pub fn rows(&self) -> Result<Vec<Row>> {
        Ok(self.lock()?.rows.values().cloned().collect())
    }

    /// Snapshot of one batch
    pub fn batch(&self, batch_id: &BatchId) -> Result<Option<Batch>> {
        Ok(self
            .lock()?
            .batches
            .iter()
            .find(|b| &b.batch_id == batch_id)
            .cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| RowStoreError::Inconsistent("row store lock poisoned".to_string()).into())
    }

    fn available(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RowStoreError::ConnectionFailed("row store unavailable".to_string()).into());
        }
        self.lock()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn test_connection(&self) -> Result<()> {
        self.available().map(|_| ())
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.available().map(|_| ())
    }

    async fn ready_grouping_keys(&self) -> Result<Vec<GroupingKey>> {
        let state = self.available()?;
        let mut oldest: HashMap<&GroupingKey, _> = HashMap::new();
        for row in state.rows.values().filter(|r| r.state == RowState::Ready) {
            let entry = oldest.entry(&row.key).or_insert((row.created_at, row.id));
            if (row.created_at, row.id) < *entry {
                *entry = (row.created_at, row.id);
            }
        }

        let mut keys: Vec<_> = oldest.into_iter().collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(keys.into_iter().map(|(k, _)| k.clone()).collect())
    }

    async fn fail_unkeyed_rows(&self, reason: &str) -> Result<Vec<RowId>> {
        let mut state = self.available()?;
        let mut failed = Vec::new();
        for (id, (row_state, error_reason)) in state.unkeyed.iter_mut() {
            if *row_state == RowState::Ready {
                *row_state = RowState::Failed;
                *error_reason = Some(reason.to_string());
                failed.push(*id);
            }
        }
        Ok(failed)
    }

    async fn fetch_ready(&self, key: &GroupingKey, limit: usize) -> Result<Vec<Row>> {
        let state = self.available()?;
        let mut rows: Vec<Row> = state
            .rows
            .values()
            .filter(|r| r.state == RowState::Ready && &r.key == key)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn claim(&self, key: &GroupingKey, rows: &[RowId]) -> Result<Batch> {
        let mut state = self.available()?;

        if rows.is_empty() {
            return Err(BridgeError::Validation("Cannot claim an empty row set".to_string()));
        }

        let all_ready = rows.iter().all(|id| {
            state
                .rows
                .get(id)
                .is_some_and(|r| r.state == RowState::Ready && &r.key == key)
        });
        if !all_ready {
            return Err(BridgeError::concurrent_claim(
                key.to_string(),
                "rows are no longer ready",
            ));
        }

        let prefix = BatchId::prefix_for(key, rows.len());
        let seq = next_sequence(&prefix, state.batches.iter().map(|b| &b.batch_id));
        let batch_id = BatchId::derive(key, rows.len(), seq);

        let now = Utc::now();
        for id in rows {
            if let Some(row) = state.rows.get_mut(id) {
                row.state = RowState::Selected;
                row.batch_id = Some(batch_id.clone());
                row.updated_at = now;
            }
        }

        let batch = Batch::staged(batch_id, key.clone(), rows.to_vec());
        state.batches.push(batch.clone());
        Ok(batch)
    }

    async fn staged_batches(&self, limit: usize) -> Result<Vec<Batch>> {
        let state = self.available()?;
        let mut staged: Vec<Batch> = state
            .batches
            .iter()
            .filter(|b| b.state == BatchState::Staged)
            .cloned()
            .collect();
        staged.sort_by(|a, b| {
            (a.selected_at, &a.batch_id).cmp(&(b.selected_at, &b.batch_id))
        });
        staged.truncate(limit);
        Ok(staged)
    }

    async fn load_batch_rows(&self, batch_id: &BatchId) -> Result<Vec<Row>> {
        let state = self.available()?;
        let mut rows: Vec<Row> = state
            .rows
            .values()
            .filter(|r| r.state == RowState::Selected && r.batch_id.as_ref() == Some(batch_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(rows)
    }

    async fn begin_delivery(
        &self,
        record: &DeliveryRecord,
        lease_timeout: Duration,
    ) -> Result<()> {
        let mut state = self.available()?;

        if let Some(existing) = state.deliveries.get(&record.batch_id) {
            match existing.can_take_over(lease_timeout, Utc::now()) {
                Ok(()) => {}
                Err(DeliveryOutcome::Delivered) => {
                    return Err(BridgeError::AlreadyDelivered {
                        batch_id: existing.batch_id.to_string(),
                        file_name: existing.file_name.clone(),
                    })
                }
                Err(_) => {
                    return Err(BridgeError::concurrent_claim(
                        record.batch_id.to_string(),
                        format!("delivery lease held by run {}", existing.run_id),
                    ))
                }
            }
        }

        let mut lease = record.clone();
        lease.outcome = DeliveryOutcome::Retrying;
        lease.recorded_at = Utc::now();
        state.deliveries.insert(lease.batch_id.clone(), lease);
        Ok(())
    }

    async fn complete_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        let mut state = self.available()?;
        match state.deliveries.get_mut(&record.batch_id) {
            Some(existing) if existing.run_id == record.run_id => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(BridgeError::concurrent_claim(
                record.batch_id.to_string(),
                "delivery lease was lost",
            )),
        }
    }

    async fn delivery_record(&self, batch_id: &BatchId) -> Result<Option<DeliveryRecord>> {
        Ok(self.available()?.deliveries.get(batch_id).cloned())
    }

    async fn mark_delivered(&self, batch_id: &BatchId) -> Result<()> {
        let mut state = self.available()?;
        let batch = state.batch_mut(batch_id)?;
        if batch.state != BatchState::Staged {
            return Ok(());
        }
        batch.state = BatchState::Delivered;

        let now = Utc::now();
        for row in state.rows.values_mut() {
            if row.state == RowState::Selected && row.batch_id.as_ref() == Some(batch_id) {
                row.state = RowState::Delivered;
                row.updated_at = now;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, batch_id: &BatchId, failures: &[RowFailure]) -> Result<()> {
        let mut state = self.available()?;
        state.batch_mut(batch_id)?;

        let now = Utc::now();
        for failure in failures {
            if let Some(row) = state.rows.get_mut(&failure.row_id) {
                if row.state == RowState::Selected && row.batch_id.as_ref() == Some(batch_id) {
                    row.state = RowState::Failed;
                    row.error_reason = Some(failure.reason.clone());
                    row.updated_at = now;
                }
            }
        }

        if !state.has_selected_rows(batch_id) {
            let batch = state.batch_mut(batch_id)?;
            if batch.state == BatchState::Staged {
                batch.state = BatchState::Failed;
            }
        }
        Ok(())
    }

    async fn mark_archived(&self, batch_id: &BatchId) -> Result<()> {
        let mut state = self.available()?;
        let batch = state.batch_mut(batch_id)?;
        if batch.state == BatchState::Delivered {
            batch.state = BatchState::Archived;
        }
        Ok(())
    }

    async fn list_batches(&self, filter: &BatchFilter, limit: usize) -> Result<Vec<Batch>> {
        let state = self.available()?;
        let mut batches: Vec<Batch> = state
            .batches
            .iter()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.selected_at.cmp(&a.selected_at));
        batches.truncate(limit);
        Ok(batches)
    }

    async fn state_counts(&self) -> Result<StateCounts> {
        let state = self.available()?;
        let mut counts = StateCounts::default();
        let unkeyed = state.unkeyed.values().map(|(row_state, _)| *row_state);
        for row_state in state.rows.values().map(|r| r.state).chain(unkeyed) {
            match row_state {
                RowState::Ready => counts.rows_ready += 1,
                RowState::Selected => counts.rows_selected += 1,
                RowState::Delivered => counts.rows_delivered += 1,
                RowState::Failed => counts.rows_failed += 1,
            }
        }
        for batch in &state.batches {
            match batch.state {
                BatchState::Staged => counts.batches_staged += 1,
                BatchState::Delivered => counts.batches_delivered += 1,
                BatchState::Archived => counts.batches_archived += 1,
                BatchState::Failed => counts.batches_failed += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RowBuilder, RunId};
    use chrono::NaiveDate;
    use serde_json::json;

    fn key(site: &str) -> GroupingKey {
        GroupingKey::new(site, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()).unwrap()
    }

    fn seeded(n: i64) -> MemoryRowStore {
        let store = MemoryRowStore::new();
        let base = Utc::now() - Duration::minutes(10);
        for id in 1..=n {
            store
                .insert_row(
                    RowBuilder::new(id, "1", key("1").batch_date)
                        .field("qty", json!(1))
                        .created_at(base + Duration::seconds(id))
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        store
    }

    fn ids(rows: &[Row]) -> Vec<RowId> {
        rows.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_fetch_ready_orders_and_limits() {
        let store = seeded(5);
        let rows = store.fetch_ready(&key("1"), 3).await.unwrap();
        assert_eq!(ids(&rows), vec![RowId::new(1), RowId::new(2), RowId::new(3)]);
        assert!(store.fetch_ready(&key("2"), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_assigns_sequential_batch_ids() {
        let store = seeded(4);
        let first = store.claim(&key("1"), &[RowId::new(1), RowId::new(2)]).await.unwrap();
        let second = store.claim(&key("1"), &[RowId::new(3), RowId::new(4)]).await.unwrap();

        assert_eq!(first.batch_id.as_str(), "20250314-0002-1-001");
        assert_eq!(second.batch_id.as_str(), "20250314-0002-1-002");
        assert_eq!(store.row(RowId::new(1)).unwrap().unwrap().state, RowState::Selected);
    }

    #[tokio::test]
    async fn test_second_claim_of_same_rows_conflicts() {
        let store = seeded(2);
        let rows = ids(&store.fetch_ready(&key("1"), 10).await.unwrap());

        store.claim(&key("1"), &rows).await.unwrap();
        let err = store.claim(&key("1"), &rows).await.unwrap_err();

        assert!(matches!(err, BridgeError::ConcurrentClaim { .. }));
        assert_eq!(store.state_counts().await.unwrap().batches_staged, 1);
    }

    #[tokio::test]
    async fn test_partial_conflict_changes_nothing() {
        let store = seeded(3);
        store.claim(&key("1"), &[RowId::new(2)]).await.unwrap();

        let err = store
            .claim(&key("1"), &[RowId::new(1), RowId::new(2), RowId::new(3)])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConcurrentClaim { .. }));
        assert_eq!(store.row(RowId::new(1)).unwrap().unwrap().state, RowState::Ready);
        assert_eq!(store.row(RowId::new(3)).unwrap().unwrap().state, RowState::Ready);
    }

    #[tokio::test]
    async fn test_mark_failed_then_delivered() {
        let store = seeded(3);
        let batch = store
            .claim(&key("1"), &[RowId::new(1), RowId::new(2), RowId::new(3)])
            .await
            .unwrap();

        store
            .mark_failed(&batch.batch_id, &[RowFailure::new(RowId::new(2), "quantity_out_of_range")])
            .await
            .unwrap();
        assert_eq!(
            store.batch(&batch.batch_id).unwrap().unwrap().state,
            BatchState::Staged
        );

        store.mark_delivered(&batch.batch_id).await.unwrap();
        store.mark_delivered(&batch.batch_id).await.unwrap();

        let counts = store.state_counts().await.unwrap();
        assert_eq!(counts.rows_delivered, 2);
        assert_eq!(counts.rows_failed, 1);
        assert_eq!(counts.batches_delivered, 1);
        assert_eq!(
            store.row(RowId::new(2)).unwrap().unwrap().error_reason.as_deref(),
            Some("quantity_out_of_range")
        );
    }

    #[tokio::test]
    async fn test_mark_failed_all_rows_fails_batch() {
        let store = seeded(2);
        let batch = store.claim(&key("1"), &[RowId::new(1), RowId::new(2)]).await.unwrap();
        let failures = vec![
            RowFailure::new(RowId::new(1), "site_missing"),
            RowFailure::new(RowId::new(2), "site_missing"),
        ];

        store.mark_failed(&batch.batch_id, &failures).await.unwrap();
        store.mark_failed(&batch.batch_id, &failures).await.unwrap();

        assert_eq!(
            store.batch(&batch.batch_id).unwrap().unwrap().state,
            BatchState::Failed
        );
        store.mark_archived(&batch.batch_id).await.unwrap();
        assert_eq!(
            store.batch(&batch.batch_id).unwrap().unwrap().state,
            BatchState::Failed
        );
    }

    #[tokio::test]
    async fn test_delivery_lease() {
        let store = seeded(1);
        let batch = store.claim(&key("1"), &[RowId::new(1)]).await.unwrap();
        let lease = DeliveryRecord::lease(
            batch.batch_id.clone(),
            batch.file_name(),
            "/watch/x.csv",
            10,
            "abc",
            RunId::from("run-a"),
        );
        let timeout = Duration::seconds(600);

        store.begin_delivery(&lease, timeout).await.unwrap();

        let mut rival = lease.clone();
        rival.run_id = RunId::from("run-b");
        let err = store.begin_delivery(&rival, timeout).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConcurrentClaim { .. }));

        let err = store
            .complete_delivery(&rival.clone().settle(DeliveryOutcome::Delivered, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConcurrentClaim { .. }));

        store
            .complete_delivery(&lease.clone().settle(DeliveryOutcome::Delivered, 1))
            .await
            .unwrap();
        let err = store.begin_delivery(&rival, timeout).await.unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyDelivered { .. }));
    }

    #[tokio::test]
    async fn test_failed_delivery_can_be_retaken() {
        let store = seeded(1);
        let batch = store.claim(&key("1"), &[RowId::new(1)]).await.unwrap();
        let lease = DeliveryRecord::lease(
            batch.batch_id.clone(),
            batch.file_name(),
            "/watch/x.csv",
            10,
            "abc",
            RunId::from("run-a"),
        );
        store.begin_delivery(&lease, Duration::seconds(600)).await.unwrap();
        store
            .complete_delivery(&lease.clone().settle(DeliveryOutcome::Failed, 3))
            .await
            .unwrap();

        let mut next = lease.clone();
        next.run_id = RunId::from("run-b");
        store.begin_delivery(&next, Duration::seconds(600)).await.unwrap();
        let record = store.delivery_record(&batch.batch_id).await.unwrap().unwrap();
        assert_eq!(record.outcome, DeliveryOutcome::Retrying);
        assert_eq!(record.run_id, RunId::from("run-b"));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retryable() {
        let store = seeded(1);
        store.set_unavailable(true);
        let err = store.fetch_ready(&key("1"), 1).await.unwrap_err();
        assert!(matches!(err, BridgeError::RowStore(RowStoreError::ConnectionFailed(_))));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fail_unkeyed_rows() {
        let store = seeded(1);
        store.insert_unkeyed_row(RowId::new(50)).unwrap();

        let failed = store.fail_unkeyed_rows("site_missing").await.unwrap();
        assert_eq!(failed, vec![RowId::new(50)]);
        assert_eq!(
            store.unkeyed_row(RowId::new(50)).unwrap(),
            Some((RowState::Failed, Some("site_missing".to_string())))
        );
        assert!(store.fail_unkeyed_rows("site_missing").await.unwrap().is_empty());

        let counts = store.state_counts().await.unwrap();
        assert_eq!(counts.rows_ready, 1);
        assert_eq!(counts.rows_failed, 1);
    }

    #[tokio::test]
    async fn test_ready_grouping_keys_oldest_first() {
        let store = MemoryRowStore::new();
        let date = key("1").batch_date;
        let base = Utc::now();
        store
            .insert_row(RowBuilder::new(1, "B", date).created_at(base).build().unwrap())
            .unwrap();
        store
            .insert_row(
                RowBuilder::new(2, "A", date)
                    .created_at(base + Duration::seconds(5))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let keys = store.ready_grouping_keys().await.unwrap();
        assert_eq!(keys, vec![key("B"), key("A")]);
    }
}
