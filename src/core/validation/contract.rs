//! Print contract
//!
//! The ordered field list of the CSV the print tool imports, plus how strictly
//! rows are checked against it.

use crate::config::ValidationConfig;
use crate::core::validation::rules::FieldRule;
use crate::core::validation::{ValidationResult, Violation};
use crate::domain::{BridgeError, Result, Row};
use serde_json::{Map, Value};

/// How many violations a row reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationPolicy {
    /// Every violation, in rule order
    #[default]
    CollectAll,
    /// Only the first violation
    FirstFailure,
}

impl ValidationPolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "collect_all" => Ok(ValidationPolicy::CollectAll),
            "first_failure" => Ok(ValidationPolicy::FirstFailure),
            other => Err(BridgeError::Configuration(format!(
                "Unknown validation policy: {other}"
            ))),
        }
    }
}

/// Ordered rule set for a print row
#[derive(Debug, Clone)]
pub struct Contract {
    fields: Vec<FieldRule>,
    policy: ValidationPolicy,
    closed: bool,
}

impl Contract {
    pub fn new(fields: Vec<FieldRule>, policy: ValidationPolicy, closed: bool) -> Self {
        Self {
            fields,
            policy,
            closed,
        }
    }

    /// The contract of the label print template
    pub fn default_print_contract() -> Self {
        Self::new(
            vec![
                FieldRule::text("batch_id", 40),
                FieldRule::text("site", 60),
                FieldRule::text("template_name", 80),
                FieldRule::text("language", 10),
                FieldRule::text("product_name", 120),
                FieldRule::text("allergens_short", 80),
                FieldRule::integer("qty", 1, 999).with_code("quantity"),
            ],
            ValidationPolicy::CollectAll,
            false,
        )
    }

    /// Builds the contract from `[validation]`; no fields keeps the default
    pub fn from_config(config: &ValidationConfig) -> Result<Self> {
        let policy = ValidationPolicy::parse(&config.policy)?;

        let fields = if config.fields.is_empty() {
            Self::default_print_contract().fields
        } else {
            config
                .fields
                .iter()
                .map(FieldRule::from_config)
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self::new(fields, policy, config.closed_schema))
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub fn fields(&self) -> &[FieldRule] {
        &self.fields
    }

    /// CSV header, in contract order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Validates a row, with the store columns the contract declares filled in
    pub fn validate_row(&self, row: &Row) -> ValidationResult {
        self.validate(&self.payload_of(row))
    }

    /// The row payload as rendered and validated under this contract
    pub fn payload_of(&self, row: &Row) -> Map<String, Value> {
        row.contract_payload(&self.field_names())
    }

    /// Validates one payload
    pub fn validate(&self, payload: &Map<String, Value>) -> ValidationResult {
        let stop_at_first = self.policy == ValidationPolicy::FirstFailure;
        let mut violations = Vec::new();

        for field in &self.fields {
            violations.extend(field.check(payload.get(&field.name), stop_at_first));
            if stop_at_first && !violations.is_empty() {
                return ValidationResult::Invalid(violations);
            }
        }

        if self.closed {
            let mut unknown: Vec<&String> = payload
                .keys()
                .filter(|k| !self.fields.iter().any(|f| &f.name == *k))
                .collect();
            unknown.sort();
            for name in unknown {
                violations.push(Violation {
                    field: name.clone(),
                    code: "unknown_field".to_string(),
                    reason: format!("Field {name} is not part of the print contract"),
                });
                if stop_at_first {
                    break;
                }
            }
        }

        if violations.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(violations)
        }
    }
}

impl Default for Contract {
    fn default() -> Self {
        Self::default_print_contract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldRuleConfig;
    use crate::domain::{BatchId, RowBuilder};
    use chrono::NaiveDate;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_field_names_in_contract_order() {
        assert_eq!(
            Contract::default().field_names(),
            vec![
                "batch_id",
                "site",
                "template_name",
                "language",
                "product_name",
                "allergens_short",
                "qty"
            ]
        );
    }

    #[test]
    fn test_collect_all_reports_fields_in_order() {
        let result = Contract::default().validate(&payload(json!({
            "batch_id": "B1",
            "template_name": "T",
            "language": "en",
            "product_name": "Soup",
            "allergens_short": "",
            "qty": 0
        })));

        assert_eq!(
            result.codes(),
            vec!["site_missing", "allergens_short_missing", "quantity_out_of_range"]
        );
    }

    #[test]
    fn test_first_failure_stops() {
        let contract = Contract::new(
            Contract::default().fields().to_vec(),
            ValidationPolicy::FirstFailure,
            false,
        );
        let result = contract.validate(&payload(json!({"qty": 0})));
        assert_eq!(result.codes(), vec!["batch_id_missing"]);
    }

    #[test]
    fn test_closed_schema_reports_unknown_fields_sorted() {
        let contract = Contract::new(
            vec![FieldRule::integer("qty", 1, 999).with_code("quantity")],
            ValidationPolicy::CollectAll,
            true,
        );
        let result = contract.validate(&payload(json!({"qty": 2, "zeta": 1, "alpha": 2})));

        assert_eq!(result.codes(), vec!["unknown_field", "unknown_field"]);
        let fields: Vec<&str> = result.violations().iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_closed_schema_accepts_claimed_row_without_store_columns() {
        let contract = Contract::new(
            vec![
                FieldRule::text("product_name", 120),
                FieldRule::integer("qty", 1, 999).with_code("quantity"),
            ],
            ValidationPolicy::CollectAll,
            true,
        );
        let row = RowBuilder::new(4, "1", NaiveDate::from_ymd_opt(2025, 3, 14).unwrap())
            .field("product_name", json!("Pea soup"))
            .field("qty", json!(3))
            .batch_id(BatchId::new("20250314-0001-1-001").unwrap())
            .build()
            .unwrap();

        assert!(contract.validate_row(&row).is_valid());
        assert!(!contract.payload_of(&row).contains_key("batch_id"));
    }

    #[test]
    fn test_default_contract_fills_store_columns() {
        let row = RowBuilder::new(4, "1", NaiveDate::from_ymd_opt(2025, 3, 14).unwrap())
            .field("template_name", json!("SOUP"))
            .field("language", json!("en"))
            .field("product_name", json!("Pea soup"))
            .field("allergens_short", json!("celery"))
            .field("qty", json!(3))
            .batch_id(BatchId::new("20250314-0001-1-001").unwrap())
            .build()
            .unwrap();

        assert!(Contract::default().validate_row(&row).is_valid());
    }

    #[test]
    fn test_open_schema_ignores_extra_fields() {
        let contract = Contract::new(
            vec![FieldRule::integer("qty", 1, 999)],
            ValidationPolicy::CollectAll,
            false,
        );
        assert!(contract
            .validate(&payload(json!({"qty": 2, "extra": "x"})))
            .is_valid());
    }

    #[test]
    fn test_from_config_uses_configured_fields() {
        let config = ValidationConfig {
            policy: "first_failure".to_string(),
            closed_schema: true,
            fields: vec![FieldRuleConfig {
                name: "language".to_string(),
                required: true,
                kind: "text".to_string(),
                max_length: Some(2),
                allowed: vec!["en".to_string(), "de".to_string()],
                min: None,
                max: None,
                pattern: None,
                code: None,
            }],
        };
        let contract = Contract::from_config(&config).unwrap();

        assert_eq!(contract.field_names(), vec!["language"]);
        assert_eq!(contract.policy(), ValidationPolicy::FirstFailure);
        assert_eq!(
            contract.validate(&payload(json!({"language": "fr"}))).codes(),
            vec!["language_not_allowed"]
        );
    }

    #[test]
    fn test_from_config_without_fields_keeps_default() {
        let contract = Contract::from_config(&ValidationConfig::default()).unwrap();
        assert_eq!(contract.fields().len(), 7);
    }
}
