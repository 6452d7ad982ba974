//! Block-style YAML output
//!
//! Every string scalar is emitted double-quoted: readers of this output
//! sniff types from plain scalars, so an unquoted `"123"` would come back as
//! a number.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::error::FactError;
use crate::value::Value;

const INDENT: usize = 2;

/// Words a YAML reader would not take as a plain string key
const RESERVED: [&str; 11] = [
    "true", "false", "yes", "no", "on", "off", "null", "y", "n", "~", "",
];

/// Write facts as a block-style YAML mapping
pub fn write<W: Write>(facts: &BTreeMap<String, Value>, out: &mut W) -> Result<(), FactError> {
    let mut emitter = Emitter { out };
    if facts.is_empty() {
        writeln!(emitter.out, "{{}}")?;
    } else {
        emitter.map(facts, 0)?;
    }
    Ok(())
}

struct Emitter<'a, W: Write> {
    out: &'a mut W,
}

impl<W: Write> Emitter<'_, W> {
    fn map(&mut self, map: &BTreeMap<String, Value>, indent: usize) -> io::Result<()> {
        for (key, value) in map {
            write!(self.out, "{:indent$}{}:", "", render_key(key))?;
            self.node(value, indent)?;
        }
        Ok(())
    }

    fn sequence(&mut self, items: &[Value], indent: usize) -> io::Result<()> {
        for item in items {
            write!(self.out, "{:indent$}-", "")?;
            self.node(item, indent)?;
        }
        Ok(())
    }

    /// Emit a node following a `key:` or `-` indicator at `indent`
    fn node(&mut self, value: &Value, indent: usize) -> io::Result<()> {
        match value {
            Value::Map(map) if !map.is_empty() => {
                writeln!(self.out)?;
                self.map(map, indent + INDENT)
            }
            Value::Array(items) if !items.is_empty() => {
                writeln!(self.out)?;
                self.sequence(items, indent + INDENT)
            }
            Value::Foreign(foreign) => match foreign.materialize() {
                Some(value) => self.node(&value, indent),
                None => writeln!(self.out, " ~"),
            },
            scalar => writeln!(self.out, " {}", render_scalar(scalar)),
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Integer(i) => i.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Double(d) => render_double(*d),
        Value::Array(_) => "[]".to_string(),
        Value::Map(_) => "{}".to_string(),
        Value::Foreign(_) => "~".to_string(),
    }
}

fn render_double(d: f64) -> String {
    if d.is_nan() {
        return ".nan".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { ".inf" } else { "-.inf" }.to_string();
    }
    let text = d.to_string();
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{text}.0")
    }
}

fn render_key(key: &str) -> String {
    let mut chars = key.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !RESERVED.iter().any(|r| r.eq_ignore_ascii_case(key));

    if plain { key.to_string() } else { quote(key) }
}

/// Double-quote a string; JSON escapes are valid YAML double-quoted escapes
fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}
