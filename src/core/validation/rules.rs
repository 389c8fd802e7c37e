//! Field rules
//!
//! A field rule checks one payload value in a fixed order: presence, type,
//! max length, enumerated set, range, pattern.

use crate::config::FieldRuleConfig;
use crate::core::validation::Violation;
use crate::domain::{BridgeError, Result};
use regex::Regex;
use serde_json::Value;

/// Value kind a field accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Strings, numbers and booleans, compared as text
    Text,
    /// JSON integers or strings that parse as `i64`
    Integer,
}

impl FieldKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(FieldKind::Text),
            "integer" => Ok(FieldKind::Integer),
            other => Err(BridgeError::Configuration(format!(
                "Unknown field kind: {other}"
            ))),
        }
    }
}

/// Rule set for one contract field
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub code: String,
    pub required: bool,
    pub kind: FieldKind,
    pub max_length: Option<usize>,
    pub allowed: Vec<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub pattern: Option<Regex>,
}

impl FieldRule {
    /// Required text field with a maximum length
    pub fn text(name: &str, max_length: usize) -> Self {
        Self {
            name: name.to_string(),
            code: name.to_string(),
            required: true,
            kind: FieldKind::Text,
            max_length: Some(max_length),
            allowed: Vec::new(),
            min: None,
            max: None,
            pattern: None,
        }
    }

    /// Required integer field within `min..=max`
    pub fn integer(name: &str, min: i64, max: i64) -> Self {
        Self {
            name: name.to_string(),
            code: name.to_string(),
            required: true,
            kind: FieldKind::Integer,
            max_length: None,
            allowed: Vec::new(),
            min: Some(min),
            max: Some(max),
            pattern: None,
        }
    }

    /// Overrides the rule code prefix
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = code.to_string();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn from_config(config: &FieldRuleConfig) -> Result<Self> {
        let pattern = config
            .pattern
            .as_deref()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                    BridgeError::Configuration(format!(
                        "Invalid pattern for field {}: {e}",
                        config.name
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            name: config.name.clone(),
            code: config.code.clone().unwrap_or_else(|| config.name.clone()),
            required: config.required,
            kind: FieldKind::parse(&config.kind)?,
            max_length: config.max_length,
            allowed: config.allowed.clone(),
            min: config.min,
            max: config.max,
            pattern,
        })
    }

    fn violation(&self, rule: &str, reason: String) -> Violation {
        Violation {
            field: self.name.clone(),
            code: format!("{}_{rule}", self.code),
            reason,
        }
    }

    /// Checks a value, returning violations in rule order
    ///
    /// With `stop_at_first` only the first violation is returned.
    pub fn check(&self, value: Option<&Value>, stop_at_first: bool) -> Vec<Violation> {
        let Some(value) = value.filter(|v| !is_missing(v)) else {
            return if self.required {
                vec![self.violation("missing", format!("Missing required field: {}", self.name))]
            } else {
                Vec::new()
            };
        };

        let text = match self.kind {
            FieldKind::Text => match as_text(value) {
                Some(text) => text,
                None => {
                    return vec![self.violation(
                        "wrong_type",
                        format!("Field {} must be a scalar value", self.name),
                    )]
                }
            },
            FieldKind::Integer => match as_integer(value) {
                Some(n) => n.to_string(),
                None => {
                    return vec![self.violation(
                        "not_integer",
                        format!("Field {} must be an integer", self.name),
                    )]
                }
            },
        };

        let mut violations = Vec::new();

        if let Some(max) = self.max_length {
            if text.chars().count() > max {
                violations.push(self.violation(
                    "too_long",
                    format!("Field too long: {} (max {max})", self.name),
                ));
                if stop_at_first {
                    return violations;
                }
            }
        }

        if !self.allowed.is_empty() && !self.allowed.iter().any(|a| a == &text) {
            violations.push(self.violation(
                "not_allowed",
                format!("Field {} must be one of: {}", self.name, self.allowed.join(", ")),
            ));
            if stop_at_first {
                return violations;
            }
        }

        if self.kind == FieldKind::Integer {
            if let Ok(n) = text.parse::<i64>() {
                let below = self.min.is_some_and(|min| n < min);
                let above = self.max.is_some_and(|max| n > max);
                if below || above {
                    violations.push(self.violation("out_of_range", self.range_reason()));
                    if stop_at_first {
                        return violations;
                    }
                }
            }
        }

        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(&text) {
                violations.push(self.violation(
                    "pattern_mismatch",
                    format!("Field {} does not match the required pattern", self.name),
                ));
            }
        }

        violations
    }

    fn range_reason(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{} must be {min}..{max}", self.name),
            (Some(min), None) => format!("{} must be at least {min}", self.name),
            (None, Some(max)) => format!("{} must be at most {max}", self.name),
            (None, None) => format!("{} is out of range", self.name),
        }
    }
}

/// Absent, null or blank
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Text form of a scalar; `None` for objects and arrays
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Integer value of a JSON integer or a numeric string
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
