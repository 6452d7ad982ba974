//! Typed JSON output

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::FactError;
use crate::value::Value;

/// Write facts as a pretty-printed JSON object
pub fn write<W: Write>(facts: &BTreeMap<String, Value>, out: &mut W) -> Result<(), FactError> {
    let document: serde_json::Map<String, serde_json::Value> = facts
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();

    serde_json::to_writer_pretty(out, &document)?;
    Ok(())
}
