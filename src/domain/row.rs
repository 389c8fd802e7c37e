//! Print row model
//!
//! A row is one label request in the upstream queue table. Its payload is a
//! JSON object with the fields the print contract names; the lifecycle state
//! is owned by the row store and only changes through claim and mark calls.

use crate::domain::ids::{BatchId, GroupingKey, RowId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    /// Waiting to be picked up by the selector
    Ready,
    /// Claimed into a staged batch
    Selected,
    /// Written to the watch folder
    Delivered,
    /// Rejected by validation
    Failed,
}

impl RowState {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RowState::Ready => "ready",
            RowState::Selected => "selected",
            RowState::Delivered => "delivered",
            RowState::Failed => "failed",
        }
    }

    /// Delivered and failed rows never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RowState::Delivered | RowState::Failed)
    }
}

impl Default for RowState {
    fn default() -> Self {
        Self::Ready
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(RowState::Ready),
            "selected" => Ok(RowState::Selected),
            "delivered" => Ok(RowState::Delivered),
            "failed" => Ok(RowState::Failed),
            other => Err(format!("Unknown row state: {other}")),
        }
    }
}

/// A single print request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Primary key
    pub id: RowId,

    /// Site and production date the row is grouped by
    pub key: GroupingKey,

    /// Named label fields
    pub payload: serde_json::Map<String, serde_json::Value>,

    /// Current lifecycle state
    pub state: RowState,

    /// Batch the row was claimed into
    pub batch_id: Option<BatchId>,

    /// Rejection reason, set when the row failed
    pub error_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Row {
    /// Looks up a payload field
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.payload.get(name)
    }

    /// Payload as seen by a contract declaring `fields`
    ///
    /// When declared, the batch id and site columns come from the row itself
    /// once it has been claimed, so the delivered file always agrees with the
    /// store. Undeclared store columns are never added.
    pub fn contract_payload(
        &self,
        fields: &[&str],
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut payload = self.payload.clone();
        let declares = |name: &str| fields.iter().any(|f| *f == name);

        if let Some(batch_id) = self.batch_id.as_ref().filter(|_| declares("batch_id")) {
            payload.insert(
                "batch_id".to_string(),
                serde_json::Value::String(batch_id.to_string()),
            );
        }
        if declares("site") {
            payload
                .entry("site".to_string())
                .or_insert_with(|| serde_json::Value::String(self.key.site.clone()));
        }
        payload
    }
}

/// A rejected row and why, as handed to `mark_failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_id: RowId,
    pub reason: String,
}

impl RowFailure {
    pub fn new(row_id: RowId, reason: impl Into<String>) -> Self {
        Self {
            row_id,
            reason: reason.into(),
        }
    }
}

/// Builder for creating Row instances
///
/// # Examples
///
/// ```
/// use labelbridge::domain::row::RowBuilder;
/// use chrono::NaiveDate;
/// use serde_json::json;
///
/// let row = RowBuilder::new(1, "1", NaiveDate::from_ymd_opt(2025, 3, 14).unwrap())
///     .field("product_name", json!("Tomato soup"))
///     .field("qty", json!(4))
///     .build()
///     .unwrap();
///
/// assert_eq!(row.field("qty"), Some(&json!(4)));
/// ```
pub struct RowBuilder {
    id: RowId,
    site: String,
    batch_date: NaiveDate,
    payload: serde_json::Map<String, serde_json::Value>,
    state: RowState,
    batch_id: Option<BatchId>,
    error_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl RowBuilder {
    /// Create a new RowBuilder
    pub fn new(id: i64, site: impl Into<String>, batch_date: NaiveDate) -> Self {
        Self {
            id: RowId::new(id),
            site: site.into(),
            batch_date,
            payload: serde_json::Map::new(),
            state: RowState::Ready,
            batch_id: None,
            error_reason: None,
            created_at: None,
        }
    }

    /// Set one payload field
    pub fn field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(name.into(), value);
        self
    }

    /// Replace the whole payload
    pub fn payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn state(mut self, state: RowState) -> Self {
        self.state = state;
        self
    }

    pub fn batch_id(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn error_reason(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Build the Row
    pub fn build(self) -> Result<Row, String> {
        let key = GroupingKey::new(self.site, self.batch_date)?;
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Ok(Row {
            id: self.id,
            key,
            payload: self.payload,
            state: self.state,
            batch_id: self.batch_id,
            error_reason: self.error_reason,
            created_at,
            updated_at: created_at,
        })
    }
}
