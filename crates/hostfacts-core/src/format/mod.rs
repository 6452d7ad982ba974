//! Output formats for a resolved collection

pub mod hash;
pub mod json;
pub mod yaml;

use std::fmt;
use std::str::FromStr;

use crate::error::FactError;

/// Supported output formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// `name => value` lines
    #[default]
    Hash,
    /// Pretty-printed JSON document
    Json,
    /// Block-style YAML document
    Yaml,
}

impl FromStr for Format {
    type Err = FactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hash" => Ok(Format::Hash),
            "json" => Ok(Format::Json),
            "yaml" => Ok(Format::Yaml),
            other => Err(FactError::Serialization(format!("unknown format: {other}"))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Hash => "hash",
            Format::Json => "json",
            Format::Yaml => "yaml",
        })
    }
}
