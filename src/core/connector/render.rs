//! CSV rendering
//!
//! One header line with the contract's field names, then one line per row in
//! the same column order. `,` delimiter, `\n` terminator, quotes only where
//! needed. Integer fields are written in their normalised form (`"007"`
//! becomes `7`).

use crate::core::validation::rules::{as_integer, as_text};
use crate::core::validation::{Contract, FieldKind};
use crate::domain::{Result, Row};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde_json::Value;

fn cell(kind: FieldKind, value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    match kind {
        FieldKind::Integer => as_integer(value)
            .map(|n| n.to_string())
            .or_else(|| as_text(value))
            .unwrap_or_default(),
        FieldKind::Text => as_text(value).unwrap_or_default(),
    }
}

/// Renders rows as CSV bytes in contract order
pub fn render_csv(contract: &Contract, rows: &[&Row]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(b',')
        .terminator(Terminator::Any(b'\n'))
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new());

    writer.write_record(contract.field_names())?;

    for row in rows {
        let payload = contract.payload_of(row);
        let record: Vec<String> = contract
            .fields()
            .iter()
            .map(|f| cell(f.kind, payload.get(&f.name)))
            .collect();
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| crate::domain::BridgeError::Render(e.to_string()))
}
