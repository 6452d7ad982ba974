//! JSON external fact files

use std::path::Path;

use hostfacts_core::{Collection, ExternalReader, FactError, Value};

/// Reads `*.json` files holding an object of fact name to value
#[derive(Debug, Default)]
pub struct JsonReader;

impl ExternalReader for JsonReader {
    fn can_resolve(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    fn resolve(&self, path: &Path, facts: &mut Collection) -> Result<(), FactError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| FactError::external(path, e.to_string()))?;
        let document: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| FactError::external(path, e.to_string()))?;
        let serde_json::Value::Object(entries) = document else {
            return Err(FactError::external(path, "expected a JSON object at the top level"));
        };

        for (name, value) in entries {
            facts.add(name.to_lowercase(), convert(value))?;
        }
        Ok(())
    }
}

fn convert(value: serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Boolean(b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Double)),
        serde_json::Value::String(s) => Some(Value::String(s)),
        serde_json::Value::Array(items) => {
            Some(Value::Array(items.into_iter().filter_map(convert).collect()))
        }
        serde_json::Value::Object(entries) => Some(
            entries
                .into_iter()
                .filter_map(|(k, v)| convert(v).map(|v| (k, v)))
                .collect(),
        ),
    }
}
