//! Line-oriented `name => value` output

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::FactError;
use crate::value::Value;

/// Write facts as `name => value` lines
///
/// A single fact is written as its bare value so the output can be consumed
/// directly by scripts.
pub fn write<W: Write>(facts: &BTreeMap<String, Value>, out: &mut W) -> Result<(), FactError> {
    if facts.len() == 1 {
        if let Some(value) = facts.values().next() {
            write!(out, "{}", value.text(false))?;
        }
        return Ok(());
    }

    for (i, (name, value)) in facts.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        write!(out, "{name} => {}", value.text(false))?;
    }
    Ok(())
}
