//! Error types for hostfacts-guest

use thiserror::Error;

/// Errors that can occur at the guest engine boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuestError {
    /// No engine library could be located
    #[error("could not locate a guest engine library: {0}")]
    LibraryNotFound(String),

    /// An engine library was found but could not be opened
    #[error("failed to load guest engine library {path}: {message}")]
    LibraryLoad {
        /// Library path or name
        path: String,
        /// Loader error
        message: String,
    },

    /// A required entry point is not exported by the engine library
    #[error("guest engine library is missing required symbol {symbol}")]
    MissingSymbol {
        /// The missing symbol
        symbol: &'static str,
    },

    /// The engine VM has not been brought up yet
    #[error("guest engine is not initialized")]
    NotInitialized,

    /// An exception was raised by guest code
    #[error("guest raised {class}: {message}")]
    Fault {
        /// Engine jump tag reported by the protected call
        tag: i32,
        /// Exception class name
        class: String,
        /// Exception message
        message: String,
        /// Newline-separated backtrace
        backtrace: String,
    },

    /// A qualified constant could not be resolved
    #[error("guest constant {name} is not defined: {message}")]
    Lookup {
        /// The dotted constant name
        name: String,
        /// Message of the guest lookup error
        message: String,
    },
}

impl GuestError {
    /// Check if this error means custom fact support is unavailable
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GuestError::LibraryNotFound(_)
                | GuestError::LibraryLoad { .. }
                | GuestError::MissingSymbol { .. }
        )
    }
}

/// Built-in exception classes guest faults can be raised with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseKind {
    /// `ArgumentError`
    Argument,
    /// `TypeError`
    Type,
    /// `StandardError`
    Standard,
    /// `RuntimeError`
    Runtime,
}
