//! PostgreSQL row models
//!
//! Plain mirrors of the three tables. Each reads itself from a
//! `tokio_postgres::Row` and converts into the domain type, reporting
//! malformed stored values as `RowStoreError::Inconsistent`.

use crate::domain::{
    Batch, BatchId, BatchState, DeliveryOutcome, DeliveryRecord, GroupingKey, Result, Row,
    RowId, RowState, RowStoreError, RunId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

fn inconsistent(msg: String) -> crate::domain::BridgeError {
    RowStoreError::Inconsistent(msg).into()
}

fn get<'a, T>(row: &'a tokio_postgres::Row, column: &str) -> Result<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(column)
        .map_err(|e| inconsistent(format!("column {column}: {e}")))
}

/// A row of `print_rows`
#[derive(Debug, Clone)]
pub struct PgPrintRow {
    pub id: i64,
    pub site: String,
    pub batch_date: NaiveDate,
    pub payload: Value,
    pub state: String,
    pub batch_id: Option<String>,
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PgPrintRow {
    pub fn from_row(row: &tokio_postgres::Row) -> Result<Self> {
        Ok(Self {
            id: get(row, "id")?,
            site: get(row, "site")?,
            batch_date: get(row, "batch_date")?,
            payload: get(row, "payload")?,
            state: get(row, "state")?,
            batch_id: get(row, "batch_id")?,
            error_reason: get(row, "error_reason")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    /// Convert to the domain row
    pub fn to_domain(self) -> Result<Row> {
        let payload = match self.payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(inconsistent(format!(
                    "row {} payload is not an object: {other}",
                    self.id
                )))
            }
        };

        Ok(Row {
            id: RowId::new(self.id),
            key: GroupingKey::new(self.site, self.batch_date).map_err(inconsistent)?,
            payload,
            state: self.state.parse::<RowState>().map_err(inconsistent)?,
            batch_id: self.batch_id.map(BatchId::new).transpose().map_err(inconsistent)?,
            error_reason: self.error_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A row of `print_batches`
#[derive(Debug, Clone)]
pub struct PgBatch {
    pub batch_id: String,
    pub site: String,
    pub batch_date: NaiveDate,
    pub row_ids: Vec<i64>,
    pub selected_at: DateTime<Utc>,
    pub state: String,
}

impl PgBatch {
    pub fn from_row(row: &tokio_postgres::Row) -> Result<Self> {
        Ok(Self {
            batch_id: get(row, "batch_id")?,
            site: get(row, "site")?,
            batch_date: get(row, "batch_date")?,
            row_ids: get(row, "row_ids")?,
            selected_at: get(row, "selected_at")?,
            state: get(row, "state")?,
        })
    }

    /// Convert to the domain batch
    pub fn to_domain(self) -> Result<Batch> {
        Ok(Batch {
            batch_id: BatchId::new(self.batch_id).map_err(inconsistent)?,
            key: GroupingKey::new(self.site, self.batch_date).map_err(inconsistent)?,
            row_ids: self.row_ids.into_iter().map(RowId::new).collect(),
            selected_at: self.selected_at,
            state: self.state.parse::<BatchState>().map_err(inconsistent)?,
        })
    }
}

/// A row of `delivery_records`
#[derive(Debug, Clone)]
pub struct PgDeliveryRecord {
    pub batch_id: String,
    pub file_name: String,
    pub target_path: String,
    pub byte_size: i64,
    pub checksum: String,
    pub attempts: i32,
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub outcome: String,
}

impl PgDeliveryRecord {
    pub fn from_row(row: &tokio_postgres::Row) -> Result<Self> {
        Ok(Self {
            batch_id: get(row, "batch_id")?,
            file_name: get(row, "file_name")?,
            target_path: get(row, "target_path")?,
            byte_size: get(row, "byte_size")?,
            checksum: get(row, "checksum")?,
            attempts: get(row, "attempts")?,
            run_id: get(row, "run_id")?,
            recorded_at: get(row, "recorded_at")?,
            outcome: get(row, "outcome")?,
        })
    }

    /// Convert from the domain record for binding as statement parameters
    pub fn from_domain(record: &DeliveryRecord) -> Self {
        Self {
            batch_id: record.batch_id.to_string(),
            file_name: record.file_name.clone(),
            target_path: record.target_path.clone(),
            byte_size: i64::try_from(record.byte_size).unwrap_or(i64::MAX),
            checksum: record.checksum.clone(),
            attempts: i32::try_from(record.attempts).unwrap_or(i32::MAX),
            run_id: record.run_id.to_string(),
            recorded_at: record.recorded_at,
            outcome: record.outcome.as_str().to_string(),
        }
    }

    /// Convert to the domain record
    pub fn to_domain(self) -> Result<DeliveryRecord> {
        Ok(DeliveryRecord {
            batch_id: BatchId::new(self.batch_id).map_err(inconsistent)?,
            file_name: self.file_name,
            target_path: self.target_path,
            byte_size: u64::try_from(self.byte_size)
                .map_err(|e| inconsistent(format!("byte_size: {e}")))?,
            checksum: self.checksum,
            attempts: u32::try_from(self.attempts)
                .map_err(|e| inconsistent(format!("attempts: {e}")))?,
            run_id: RunId::from(self.run_id.as_str()),
            recorded_at: self.recorded_at,
            outcome: self.outcome.parse::<DeliveryOutcome>().map_err(inconsistent)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn print_row(payload: Value, state: &str) -> PgPrintRow {
        PgPrintRow {
            id: 9,
            site: "1".to_string(),
            batch_date: date(),
            payload,
            state: state.to_string(),
            batch_id: Some("20250314-0001-1-001".to_string()),
            error_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_print_row_to_domain() {
        let row = print_row(json!({"qty": 3}), "selected").to_domain().unwrap();
        assert_eq!(row.id, RowId::new(9));
        assert_eq!(row.state, RowState::Selected);
        assert_eq!(row.field("qty"), Some(&json!(3)));
        assert_eq!(row.batch_id.unwrap().as_str(), "20250314-0001-1-001");
    }

    #[test]
    fn test_non_object_payload_is_inconsistent() {
        let err = print_row(json!([1, 2]), "ready").to_domain().unwrap_err();
        assert!(matches!(
            err,
            crate::domain::BridgeError::RowStore(RowStoreError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_unknown_state_is_inconsistent() {
        assert!(print_row(json!({}), "printing").to_domain().is_err());
    }

    #[test]
    fn test_batch_to_domain() {
        let batch = PgBatch {
            batch_id: "20250314-0002-1-001".to_string(),
            site: "1".to_string(),
            batch_date: date(),
            row_ids: vec![4, 5],
            selected_at: Utc::now(),
            state: "archived".to_string(),
        }
        .to_domain()
        .unwrap();
        assert_eq!(batch.row_ids, vec![RowId::new(4), RowId::new(5)]);
        assert_eq!(batch.state, BatchState::Archived);
    }

    #[test]
    fn test_delivery_record_conversion() {
        let record = DeliveryRecord::lease(
            BatchId::new("20250314-0002-1-001").unwrap(),
            "1-20250314-0002-1-001.csv",
            "/watch/1-20250314-0002-1-001.csv",
            128,
            "deadbeef",
            RunId::from("20250314-101500-abcdef"),
        );
        let back = PgDeliveryRecord::from_domain(&record).to_domain().unwrap();
        assert_eq!(back, record);
    }
}
