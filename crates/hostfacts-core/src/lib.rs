//! hostfacts-core: lazily-resolved host facts
//!
//! Provides the fact value model, the resolver registry with exactly-once
//! resolution, and the hash/JSON/YAML writers.

pub mod collection;
pub mod error;
pub mod external;
pub mod format;
pub mod resolver;
pub mod resolvers;
pub mod util;
pub mod value;

pub use collection::Collection;
pub use error::FactError;
pub use external::ExternalReader;
pub use format::Format;
pub use resolver::{Patterns, Resolver, ResolverId};
pub use value::{ForeignValue, Value};
