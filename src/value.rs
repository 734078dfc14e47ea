//! Structured values exchanged with tools.
//!
//! A closed tagged union of null, bool, number, string, sequence and mapping.
//! `serde_json::Value` is exactly that union; the crate enables
//! `preserve_order` so mappings keep the order they were written in.

pub use serde_json::Value as StructuredValue;

use crate::error::Result;

/// An empty mapping, used when a call carries no parameters
pub fn empty_mapping() -> StructuredValue {
    StructuredValue::Object(serde_json::Map::new())
}

/// Render a value for standard output
pub fn render(value: &StructuredValue) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
