//! PostgreSQL adapter implementing the row store trait
//!
//! Every state transition is one transaction. Row updates carry their
//! expected current state in the `WHERE` clause, so of two overlapping
//! invocations exactly one sees its rows change.

use crate::adapters::postgresql::client::{is_unique_violation, map_pg_error, PostgreSQLClient};
use crate::adapters::postgresql::models::{PgBatch, PgDeliveryRecord, PgPrintRow};
use crate::adapters::store::RowStore;
use crate::domain::ids::next_sequence;
use crate::domain::{
    Batch, BatchFilter, BatchId, BatchState, BridgeError, DeliveryOutcome, DeliveryRecord,
    GroupingKey, Result, Row, RowFailure, RowId, RowStoreError, StateCounts,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_postgres::Transaction;

const ROW_COLUMNS: &str =
    "id, site, batch_date, payload, state, batch_id, error_reason, created_at, updated_at";

const BATCH_COLUMNS: &str = "batch_id, site, batch_date, row_ids, selected_at, state";

/// Grouping form of the site column; strips the same set as `SITE_PADDING`
const SITE_KEY: &str = "btrim(site, E' \\t\\r\\n')";

const DELIVERY_COLUMNS: &str = "batch_id, file_name, target_path, byte_size, checksum, \
     attempts, run_id, recorded_at, outcome";

/// PostgreSQL implementation of [`RowStore`]
pub struct PostgreSQLAdapter {
    client: Arc<PostgreSQLClient>,
}

impl PostgreSQLAdapter {
    /// Create a new PostgreSQL adapter
    pub fn new(client: PostgreSQLClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Arc<PostgreSQLClient> {
        &self.client
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn rows_to_domain(rows: &[tokio_postgres::Row]) -> Result<Vec<Row>> {
    rows.iter()
        .map(|r| PgPrintRow::from_row(r)?.to_domain())
        .collect()
}

fn batches_to_domain(rows: &[tokio_postgres::Row]) -> Result<Vec<Batch>> {
    rows.iter()
        .map(|r| PgBatch::from_row(r)?.to_domain())
        .collect()
}

/// Locks a batch row and returns its state, or `None` if it doesn't exist
async fn lock_batch(tx: &Transaction<'_>, batch_id: &BatchId) -> Result<Option<BatchState>> {
    let row = tx
        .query_opt(
            "SELECT state FROM print_batches WHERE batch_id = $1 FOR UPDATE",
            &[&batch_id.as_str()],
        )
        .await
        .map_err(map_pg_error)?;

    row.map(|r| {
        r.get::<_, String>("state")
            .parse::<BatchState>()
            .map_err(|e| BridgeError::from(RowStoreError::Inconsistent(e)))
    })
    .transpose()
}

fn unknown_batch(batch_id: &BatchId) -> BridgeError {
    RowStoreError::Inconsistent(format!("Unknown batch {batch_id}")).into()
}

#[async_trait]
impl RowStore for PostgreSQLAdapter {
    fn backend_name(&self) -> &str {
        "postgresql"
    }

    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.client.apply_schema().await
    }

    async fn ready_grouping_keys(&self) -> Result<Vec<GroupingKey>> {
        let conn = self.client.connection().await?;
        let query = format!(
            "SELECT {SITE_KEY} AS site, batch_date FROM print_rows \
             WHERE state = 'ready' AND {SITE_KEY} <> '' \
             GROUP BY {SITE_KEY}, batch_date ORDER BY MIN(created_at), MIN(id)"
        );
        let rows = conn.query(&query, &[]).await.map_err(map_pg_error)?;

        rows.iter()
            .map(|r| {
                GroupingKey::new(r.get::<_, String>("site"), r.get("batch_date"))
                    .map_err(|e| BridgeError::from(RowStoreError::Inconsistent(e)))
            })
            .collect()
    }

    async fn fail_unkeyed_rows(&self, reason: &str) -> Result<Vec<RowId>> {
        let conn = self.client.connection().await?;
        let query = format!(
            "UPDATE print_rows SET state = 'failed', error_reason = $1, updated_at = NOW() \
             WHERE state = 'ready' AND {SITE_KEY} = '' RETURNING id"
        );
        let rows = conn.query(&query, &[&reason]).await.map_err(map_pg_error)?;

        Ok(rows.iter().map(|r| RowId::new(r.get("id"))).collect())
    }

    async fn fetch_ready(&self, key: &GroupingKey, limit: usize) -> Result<Vec<Row>> {
        let conn = self.client.connection().await?;
        let query = format!(
            "SELECT {ROW_COLUMNS} FROM print_rows \
             WHERE state = 'ready' AND {SITE_KEY} = $1 AND batch_date = $2 \
             ORDER BY created_at, id LIMIT $3"
        );
        let rows = conn
            .query(&query, &[&key.site, &key.batch_date, &limit_param(limit)])
            .await
            .map_err(map_pg_error)?;

        rows_to_domain(&rows)
    }

    async fn claim(&self, key: &GroupingKey, rows: &[RowId]) -> Result<Batch> {
        if rows.is_empty() {
            return Err(BridgeError::Validation("Cannot claim an empty row set".to_string()));
        }

        let mut conn = self.client.connection().await?;
        let tx = conn.transaction().await.map_err(map_pg_error)?;

        let prefix = BatchId::prefix_for(key, rows.len());
        let existing: Vec<BatchId> = tx
            .query(
                "SELECT batch_id FROM print_batches WHERE batch_id LIKE $1",
                &[&format!("{prefix}%")],
            )
            .await
            .map_err(map_pg_error)?
            .iter()
            .filter_map(|r| BatchId::new(r.get::<_, String>("batch_id")).ok())
            .collect();
        let batch_id = BatchId::derive(key, rows.len(), next_sequence(&prefix, &existing));
        let batch = Batch::staged(batch_id, key.clone(), rows.to_vec());
        let ids: Vec<i64> = rows.iter().map(RowId::value).collect();

        let inserted = tx
            .execute(
                "INSERT INTO print_batches (batch_id, site, batch_date, row_ids, selected_at, state) \
                 VALUES ($1, $2, $3, $4, $5, 'staged')",
                &[
                    &batch.batch_id.as_str(),
                    &key.site,
                    &key.batch_date,
                    &ids,
                    &batch.selected_at,
                ],
            )
            .await;
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(BridgeError::concurrent_claim(
                    batch.batch_id.to_string(),
                    "batch id taken by a concurrent claim",
                ));
            }
            return Err(map_pg_error(e));
        }

        let claim_rows = format!(
            "UPDATE print_rows SET state = 'selected', batch_id = $1, updated_at = NOW() \
             WHERE id = ANY($2) AND state = 'ready' AND {SITE_KEY} = $3 AND batch_date = $4"
        );
        let claimed = tx
            .execute(
                claim_rows.as_str(),
                &[&batch.batch_id.as_str(), &ids, &key.site, &key.batch_date],
            )
            .await
            .map_err(map_pg_error)?;

        if claimed != ids.len() as u64 {
            drop(tx);
            return Err(BridgeError::concurrent_claim(
                key.to_string(),
                format!("{} of {} rows were no longer ready", ids.len() as u64 - claimed, ids.len()),
            ));
        }

        tx.commit().await.map_err(map_pg_error)?;
        Ok(batch)
    }

    async fn staged_batches(&self, limit: usize) -> Result<Vec<Batch>> {
        let conn = self.client.connection().await?;
        let query = format!(
            "SELECT {BATCH_COLUMNS} FROM print_batches WHERE state = 'staged' \
             ORDER BY selected_at, batch_id LIMIT $1"
        );
        let rows = conn
            .query(&query, &[&limit_param(limit)])
            .await
            .map_err(map_pg_error)?;

        batches_to_domain(&rows)
    }

    async fn load_batch_rows(&self, batch_id: &BatchId) -> Result<Vec<Row>> {
        let conn = self.client.connection().await?;
        let query = format!(
            "SELECT {ROW_COLUMNS} FROM print_rows WHERE batch_id = $1 AND state = 'selected' \
             ORDER BY created_at, id"
        );
        let rows = conn
            .query(&query, &[&batch_id.as_str()])
            .await
            .map_err(map_pg_error)?;

        rows_to_domain(&rows)
    }

    async fn begin_delivery(
        &self,
        record: &DeliveryRecord,
        lease_timeout: Duration,
    ) -> Result<()> {
        let mut conn = self.client.connection().await?;
        let tx = conn.transaction().await.map_err(map_pg_error)?;

        let query = format!(
            "SELECT {DELIVERY_COLUMNS} FROM delivery_records WHERE batch_id = $1 FOR UPDATE"
        );
        let existing = tx
            .query_opt(&query, &[&record.batch_id.as_str()])
            .await
            .map_err(map_pg_error)?
            .map(|r| PgDeliveryRecord::from_row(&r)?.to_domain())
            .transpose()?;

        let pg = PgDeliveryRecord::from_domain(record);
        match existing {
            None => {
                let inserted = tx
                    .execute(
                        "INSERT INTO delivery_records (batch_id, file_name, target_path, byte_size, \
                         checksum, attempts, run_id, recorded_at, outcome) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), 'retrying') \
                         ON CONFLICT (batch_id) DO NOTHING",
                        &[
                            &pg.batch_id,
                            &pg.file_name,
                            &pg.target_path,
                            &pg.byte_size,
                            &pg.checksum,
                            &pg.attempts,
                            &pg.run_id,
                        ],
                    )
                    .await
                    .map_err(map_pg_error)?;
                if inserted == 0 {
                    return Err(BridgeError::concurrent_claim(
                        pg.batch_id,
                        "delivery lease taken by a concurrent run",
                    ));
                }
            }
            Some(current) => {
                match current.can_take_over(lease_timeout, Utc::now()) {
                    Ok(()) => {}
                    Err(DeliveryOutcome::Delivered) => {
                        return Err(BridgeError::AlreadyDelivered {
                            batch_id: current.batch_id.to_string(),
                            file_name: current.file_name,
                        })
                    }
                    Err(_) => {
                        return Err(BridgeError::concurrent_claim(
                            pg.batch_id,
                            format!("delivery lease held by run {}", current.run_id),
                        ))
                    }
                }

                tx.execute(
                    "UPDATE delivery_records SET file_name = $2, target_path = $3, byte_size = $4, \
                     checksum = $5, attempts = $6, run_id = $7, recorded_at = NOW(), \
                     outcome = 'retrying' WHERE batch_id = $1",
                    &[
                        &pg.batch_id,
                        &pg.file_name,
                        &pg.target_path,
                        &pg.byte_size,
                        &pg.checksum,
                        &pg.attempts,
                        &pg.run_id,
                    ],
                )
                .await
                .map_err(map_pg_error)?;
            }
        }

        tx.commit().await.map_err(map_pg_error)?;
        Ok(())
    }

    async fn complete_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        let conn = self.client.connection().await?;
        let pg = PgDeliveryRecord::from_domain(record);
        let updated = conn
            .execute(
                "UPDATE delivery_records SET target_path = $3, byte_size = $4, checksum = $5, \
                 attempts = $6, recorded_at = $7, outcome = $8 \
                 WHERE batch_id = $1 AND run_id = $2",
                &[
                    &pg.batch_id,
                    &pg.run_id,
                    &pg.target_path,
                    &pg.byte_size,
                    &pg.checksum,
                    &pg.attempts,
                    &pg.recorded_at,
                    &pg.outcome,
                ],
            )
            .await
            .map_err(map_pg_error)?;

        if updated == 0 {
            return Err(BridgeError::concurrent_claim(
                pg.batch_id,
                "delivery lease was lost",
            ));
        }
        Ok(())
    }

    async fn delivery_record(&self, batch_id: &BatchId) -> Result<Option<DeliveryRecord>> {
        let conn = self.client.connection().await?;
        let query = format!("SELECT {DELIVERY_COLUMNS} FROM delivery_records WHERE batch_id = $1");
        conn.query_opt(&query, &[&batch_id.as_str()])
            .await
            .map_err(map_pg_error)?
            .map(|r| PgDeliveryRecord::from_row(&r)?.to_domain())
            .transpose()
    }

    async fn mark_delivered(&self, batch_id: &BatchId) -> Result<()> {
        let mut conn = self.client.connection().await?;
        let tx = conn.transaction().await.map_err(map_pg_error)?;

        match lock_batch(&tx, batch_id).await? {
            None => return Err(unknown_batch(batch_id)),
            Some(BatchState::Staged) => {}
            Some(_) => return Ok(()),
        }

        tx.execute(
            "UPDATE print_batches SET state = 'delivered', updated_at = NOW() WHERE batch_id = $1",
            &[&batch_id.as_str()],
        )
        .await
        .map_err(map_pg_error)?;
        tx.execute(
            "UPDATE print_rows SET state = 'delivered', updated_at = NOW() \
             WHERE batch_id = $1 AND state = 'selected'",
            &[&batch_id.as_str()],
        )
        .await
        .map_err(map_pg_error)?;

        tx.commit().await.map_err(map_pg_error)?;
        Ok(())
    }

    async fn mark_failed(&self, batch_id: &BatchId, failures: &[RowFailure]) -> Result<()> {
        let mut conn = self.client.connection().await?;
        let tx = conn.transaction().await.map_err(map_pg_error)?;

        if lock_batch(&tx, batch_id).await?.is_none() {
            return Err(unknown_batch(batch_id));
        }

        for failure in failures {
            tx.execute(
                "UPDATE print_rows SET state = 'failed', error_reason = $3, updated_at = NOW() \
                 WHERE id = $1 AND batch_id = $2 AND state = 'selected'",
                &[&failure.row_id.value(), &batch_id.as_str(), &failure.reason],
            )
            .await
            .map_err(map_pg_error)?;
        }

        tx.execute(
            "UPDATE print_batches SET state = 'failed', updated_at = NOW() \
             WHERE batch_id = $1 AND state = 'staged' AND NOT EXISTS ( \
                 SELECT 1 FROM print_rows WHERE batch_id = $1 AND state = 'selected')",
            &[&batch_id.as_str()],
        )
        .await
        .map_err(map_pg_error)?;

        tx.commit().await.map_err(map_pg_error)?;
        Ok(())
    }

    async fn mark_archived(&self, batch_id: &BatchId) -> Result<()> {
        let mut conn = self.client.connection().await?;
        let tx = conn.transaction().await.map_err(map_pg_error)?;

        match lock_batch(&tx, batch_id).await? {
            None => return Err(unknown_batch(batch_id)),
            Some(BatchState::Delivered) => {}
            Some(_) => return Ok(()),
        }

        tx.execute(
            "UPDATE print_batches SET state = 'archived', updated_at = NOW() WHERE batch_id = $1",
            &[&batch_id.as_str()],
        )
        .await
        .map_err(map_pg_error)?;

        tx.commit().await.map_err(map_pg_error)?;
        Ok(())
    }

    async fn list_batches(&self, filter: &BatchFilter, limit: usize) -> Result<Vec<Batch>> {
        let conn = self.client.connection().await?;
        let query = format!(
            "SELECT {BATCH_COLUMNS} FROM print_batches \
             WHERE ($1::text IS NULL OR state = $1) AND ($2::text IS NULL OR site = $2) \
             ORDER BY selected_at DESC LIMIT $3"
        );
        let state: Option<&str> = filter.state.map(|s| s.as_str());
        let site: Option<&str> = filter.site.as_deref();
        let rows = conn
            .query(&query, &[&state, &site, &limit_param(limit)])
            .await
            .map_err(map_pg_error)?;

        batches_to_domain(&rows)
    }

    async fn state_counts(&self) -> Result<StateCounts> {
        let conn = self.client.connection().await?;
        let mut counts = StateCounts::default();

        let rows = conn
            .query("SELECT state, COUNT(*) AS n FROM print_rows GROUP BY state", &[])
            .await
            .map_err(map_pg_error)?;
        for r in &rows {
            let n = u64::try_from(r.get::<_, i64>("n")).unwrap_or(0);
            match r.get::<_, &str>("state") {
                "ready" => counts.rows_ready = n,
                "selected" => counts.rows_selected = n,
                "delivered" => counts.rows_delivered = n,
                "failed" => counts.rows_failed = n,
                other => tracing::warn!(state = other, "Ignoring unknown row state"),
            }
        }

        let batches = conn
            .query("SELECT state, COUNT(*) AS n FROM print_batches GROUP BY state", &[])
            .await
            .map_err(map_pg_error)?;
        for r in &batches {
            let n = u64::try_from(r.get::<_, i64>("n")).unwrap_or(0);
            match r.get::<_, &str>("state") {
                "staged" => counts.batches_staged = n,
                "delivered" => counts.batches_delivered = n,
                "archived" => counts.batches_archived = n,
                "failed" => counts.batches_failed = n,
                other => tracing::warn!(state = other, "Ignoring unknown batch state"),
            }
        }

        Ok(counts)
    }
}
