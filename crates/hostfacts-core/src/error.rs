//! Error types for hostfacts-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving or rendering facts
#[derive(Error, Debug, Clone)]
pub enum FactError {
    /// A resolver failed while producing its facts
    #[error("resolver {resolver} failed: {message}")]
    Resolution {
        /// Name of the failing resolver
        resolver: String,
        /// Failure description
        message: String,
    },

    /// An external fact source could not be processed
    #[error("external facts in {}: {message}", path.display())]
    External {
        /// The offending file
        path: PathBuf,
        /// Failure description
        message: String,
    },

    /// A resolver pattern failed to compile
    #[error("invalid fact pattern: {0}")]
    InvalidPattern(String),

    /// Writing output failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Rendering a value failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl FactError {
    /// Create a resolution failure for the named resolver
    pub fn resolution(resolver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            resolver: resolver.into(),
            message: message.into(),
        }
    }

    /// Create an external fact failure for the given file
    pub fn external(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::External {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this failure only concerns a single external fact source
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self, FactError::External { .. })
    }
}

impl From<std::io::Error> for FactError {
    fn from(e: std::io::Error) -> Self {
        FactError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for FactError {
    fn from(e: serde_json::Error) -> Self {
        FactError::Serialization(e.to_string())
    }
}

impl From<regex::Error> for FactError {
    fn from(e: regex::Error) -> Self {
        FactError::InvalidPattern(e.to_string())
    }
}
