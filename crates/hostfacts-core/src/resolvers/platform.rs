//! Platform facts known at compile time

use std::env::consts;

use crate::collection::Collection;
use crate::error::FactError;
use crate::resolver::Resolver;
use crate::value::Value;

/// Resolves `kernel`, `hardwaremodel` and the structured `os` fact
#[derive(Debug, Default)]
pub struct PlatformResolver;

impl PlatformResolver {
    /// Create a new platform resolver
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Kernel name in its conventional capitalization
    fn kernel() -> String {
        match consts::OS {
            "linux" => "Linux".to_string(),
            "macos" => "Darwin".to_string(),
            "windows" => "windows".to_string(),
            "freebsd" => "FreeBSD".to_string(),
            "openbsd" => "OpenBSD".to_string(),
            "netbsd" => "NetBSD".to_string(),
            "solaris" | "illumos" => "SunOS".to_string(),
            other => other.to_string(),
        }
    }
}

impl Resolver for PlatformResolver {
    fn name(&self) -> &str {
        "platform"
    }

    fn names(&self) -> Vec<String> {
        vec![
            "kernel".to_string(),
            "hardwaremodel".to_string(),
            "os".to_string(),
        ]
    }

    fn resolve(&mut self, facts: &mut Collection) -> Result<(), FactError> {
        facts.add("kernel", Value::from(Self::kernel()))?;
        facts.add("hardwaremodel", Value::from(consts::ARCH))?;

        let os: Value = [
            ("name".to_string(), Value::from(consts::OS)),
            ("family".to_string(), Value::from(consts::FAMILY)),
            ("architecture".to_string(), Value::from(consts::ARCH)),
        ]
        .into_iter()
        .collect();
        facts.add("os", os)
    }
}
