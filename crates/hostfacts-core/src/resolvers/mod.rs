//! Built-in resolvers

pub mod memory;
pub mod platform;

pub use memory::MemoryResolver;
pub use platform::PlatformResolver;
