//! Domain models and types for labelbridge.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`RowId`], [`BatchId`], [`GroupingKey`], [`RunId`])
//! - **Domain models** ([`Row`], [`Batch`], [`DeliveryRecord`])
//! - **Error types** ([`BridgeError`], [`RowStoreError`], [`DeliverySinkError`])
//! - **Result type alias** ([`Result`])
//!
//! # Type Safety
//!
//! Identifiers are newtypes so a row id can never stand in for a batch id:
//!
//! ```rust
//! use labelbridge::domain::{BatchId, GroupingKey};
//! use chrono::NaiveDate;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = GroupingKey::new("Main Kitchen", NaiveDate::from_ymd_opt(2025, 3, 14).unwrap())?;
//! let batch_id = BatchId::derive(&key, 12, 1);
//! assert_eq!(batch_id.as_str(), "20250314-0012-MAI-001");
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! All fallible library operations return [`Result<T, BridgeError>`]:
//!
//! ```rust,no_run
//! use labelbridge::domain::Result;
//!
//! fn example() -> Result<()> {
//!     // Errors are converted using the ? operator
//!     let config = labelbridge::config::load_config("labelbridge.toml")?;
//!     config.validate().map_err(labelbridge::domain::BridgeError::Configuration)?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod context;
pub mod delivery;
pub mod errors;
pub mod ids;
pub mod result;
pub mod row;

// Re-export commonly used types for convenience
pub use batch::{Batch, BatchFilter, BatchState, StateCounts};
pub use delivery::{DeliveryOutcome, DeliveryRecord};
pub use errors::{BridgeError, DeliverySinkError, RowStoreError};
pub use ids::{BatchId, GroupingKey, RowId, RunId};
pub use result::Result;
pub use row::{Row, RowBuilder, RowFailure, RowState};
