//! Small helpers shared by resolvers

pub mod string;

pub use string::{percentage, si_string};
