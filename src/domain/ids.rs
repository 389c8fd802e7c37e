//! Domain identifier types with validation
//!
//! Newtype wrappers for the identifiers the pipeline passes around, so a row
//! id can never be confused with a batch id.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row identifier (primary key of the queue table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(i64);

impl RowId {
    /// Creates a new RowId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Batch identifier newtype wrapper
///
/// Format: `{YYYYMMDD}-{row_count:04}-{SITE_CODE}-{seq:03}`
///
/// # Examples
///
/// ```
/// use labelbridge::domain::ids::BatchId;
/// use std::str::FromStr;
///
/// let id = BatchId::from_str("20250314-0012-MAI-002").unwrap();
/// assert_eq!(id.sequence(), Some(2));
/// assert_eq!(id.prefix(), "20250314-0012-MAI-");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Creates a new BatchId from a string
    ///
    /// # Returns
    ///
    /// Returns `Ok(BatchId)` if the ID is non-empty, `Err` otherwise
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Batch ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Derives a batch id from its grouping key, size and sequence number
    pub fn derive(key: &GroupingKey, row_count: usize, sequence: u32) -> Self {
        Self(format!(
            "{}{:03}",
            Self::prefix_for(key, row_count),
            sequence
        ))
    }

    /// The prefix shared by every batch of the same key and size
    pub fn prefix_for(key: &GroupingKey, row_count: usize) -> String {
        format!(
            "{}-{:04}-{}-",
            key.batch_date.format("%Y%m%d"),
            row_count,
            site_code(&key.site)
        )
    }

    /// Returns everything up to and including the last `-`
    pub fn prefix(&self) -> &str {
        match self.0.rfind('-') {
            Some(idx) => &self.0[..=idx],
            None => &self.0,
        }
    }

    /// Extracts the trailing sequence number, if the id is in the derived format
    pub fn sequence(&self) -> Option<u32> {
        let parts: Vec<&str> = self.0.split('-').collect();
        if parts.len() < 4 {
            return None;
        }
        parts.last().and_then(|s| s.parse().ok())
    }

    /// Returns the batch ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for BatchId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Next sequence number for a prefix, given the ids already using it
pub fn next_sequence<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a BatchId>) -> u32 {
    existing
        .into_iter()
        .filter(|id| id.as_str().starts_with(prefix))
        .filter_map(BatchId::sequence)
        .max()
        .unwrap_or(0)
        + 1
}

/// Grouping key: rows of one site for one production date form one batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupingKey {
    /// Site (kitchen/outlet) the labels are printed for
    pub site: String,

    /// Production date the rows belong to
    pub batch_date: NaiveDate,
}

/// Padding stripped from a site before grouping; the row store trims the same set
pub const SITE_PADDING: [char; 4] = [' ', '\t', '\r', '\n'];

/// Site as used in grouping keys
pub fn normalize_site(site: &str) -> &str {
    site.trim_matches(SITE_PADDING)
}

impl GroupingKey {
    /// Creates a new grouping key
    pub fn new(site: impl Into<String>, batch_date: NaiveDate) -> Result<Self, String> {
        let site = site.into();
        let site = normalize_site(&site);
        if site.is_empty() {
            return Err("Grouping key site cannot be empty".to_string());
        }
        Ok(Self {
            site: site.to_string(),
            batch_date,
        })
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.site, self.batch_date.format("%Y-%m-%d"))
    }
}

/// Identifier of one pipeline invocation, `YYYYMMDD-HHMMSS-xxxxxx`
///
/// The timestamp prefix keys the quarantine and archive folders; the random
/// suffix keeps two overlapping runs started in the same second apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generates a run id for the current time
    pub fn generate() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &suffix[..6]
        ))
    }

    /// Returns the run ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Three-character site code used inside batch ids
///
/// Numeric sites are normalised (`"007"` becomes `"7"`); other sites are
/// upper-cased, stripped to alphanumerics and cut or padded to three chars.
pub fn site_code(site: &str) -> String {
    let s = site.trim().to_uppercase();
    if s.is_empty() {
        return "XXX".to_string();
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        let digits = s.trim_start_matches('0');
        return if digits.is_empty() {
            "0".to_string()
        } else {
            digits.to_string()
        };
    }

    let cleaned: String = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.len() >= 3 {
        cleaned[..3].to_string()
    } else {
        format!("{cleaned:X<3}")
    }
}

/// Keeps alphanumerics, `-` and `_`; truncates and falls back when empty
pub fn safe_name(s: &str, fallback: &str, max_len: usize) -> String {
    let safe: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(max_len)
        .collect();
    let safe = safe.trim_matches(|c| c == '-' || c == '_');
    if safe.is_empty() {
        fallback.to_string()
    } else {
        safe.to_string()
    }
}
