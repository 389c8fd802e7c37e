//! Row validation against the print contract
//!
//! Validation is pure: the same payload and contract always give the same
//! [`ValidationResult`]. Invalid rows are not errors; the connector routes
//! them to quarantine.
//!
//! # Example
//!
//! ```
//! use labelbridge::core::validation::Contract;
//! use serde_json::json;
//!
//! let payload = json!({
//!     "batch_id": "20250314-0001-1-001",
//!     "site": "1",
//!     "template_name": "SOUP_LABEL",
//!     "language": "en",
//!     "product_name": "Tomato soup",
//!     "allergens_short": "celery",
//!     "qty": 0
//! });
//!
//! let result = Contract::default().validate(payload.as_object().unwrap());
//! assert_eq!(result.codes(), vec!["quantity_out_of_range"]);
//! ```

pub mod contract;
pub mod rules;

use serde::{Deserialize, Serialize};

pub use contract::{Contract, ValidationPolicy};
pub use rules::{FieldKind, FieldRule};

/// One broken rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Payload field the rule belongs to
    pub field: String,
    /// Stable rule code, e.g. `quantity_out_of_range`
    pub code: String,
    /// Human-readable explanation
    pub reason: String,
}

/// Outcome of validating one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(v) => v,
        }
    }

    pub fn codes(&self) -> Vec<&str> {
        self.violations().iter().map(|v| v.code.as_str()).collect()
    }

    /// Rule codes joined with `;`, as stored in the row's error reason
    pub fn reason(&self) -> Option<String> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(_) => Some(self.codes().join(";")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_row() -> serde_json::Map<String, serde_json::Value> {
        json!({
            "batch_id": "20250314-0001-1-001",
            "site": "1",
            "template_name": "SOUP_LABEL",
            "language": "en",
            "product_name": "Tomato soup",
            "allergens_short": "celery",
            "qty": 12
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_complete_row_is_valid() {
        let result = Contract::default().validate(&complete_row());
        assert!(result.is_valid());
        assert_eq!(result.reason(), None);
    }

    #[test]
    fn test_removing_each_required_field_cites_exactly_that_field() {
        let contract = Contract::default();
        for field in contract.fields() {
            let mut row = complete_row();
            row.remove(&field.name);

            let result = contract.validate(&row);
            assert_eq!(
                result.codes(),
                vec![format!("{}_missing", field.code)],
                "removing {}",
                field.name
            );
        }
    }

    #[test]
    fn test_reason_joins_codes() {
        let mut row = complete_row();
        row.remove("site");
        row.insert("qty".to_string(), json!(5000));

        let result = Contract::default().validate(&row);
        assert_eq!(
            result.reason().as_deref(),
            Some("site_missing;quantity_out_of_range")
        );
    }
}
