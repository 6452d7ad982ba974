//! hostfacts-guest: bridge to an embedded scripting engine
//!
//! Binds the engine's C ABI at runtime, brings its VM up, and converts between
//! fact values and guest objects. Every call into guest code goes through a
//! protected scope so guest exceptions surface as [`GuestError`]s.

mod abi;
pub mod api;
pub mod call;
pub mod error;
pub mod handle;
pub mod library;
pub mod marshal;
pub mod resolver;

pub use abi::SymbolSource;
pub use api::{GuestApi, GuestRef};
pub use call::Scope;
pub use error::{GuestError, RaiseKind};
pub use handle::GuestHandle;
pub use library::{DynamicLibrary, LibrarySearch};
pub use resolver::EngineResolver;

/// ABI vocabulary for exporting an engine through a [`SymbolSource`]
///
/// Only names and signatures; the bound entry points stay inside the bridge.
#[doc(hidden)]
pub mod raw {
    pub use crate::abi::{
        CallbackFn, HashForeachFn, ID, ST_CONTINUE, ST_STOP, SYMBOLS, SymbolSpec, VALUE,
    };
}
