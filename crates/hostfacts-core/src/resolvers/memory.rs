//! System memory facts

use sysinfo::System;
use tracing::debug;

use crate::collection::Collection;
use crate::error::FactError;
use crate::resolver::Resolver;
use crate::util::{percentage, si_string};
use crate::value::Value;

/// Raw memory figures in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Total physical memory
    pub total: u64,
    /// Memory available to new allocations
    pub available: u64,
    /// Total swap
    pub swap_total: u64,
    /// Free swap
    pub swap_free: u64,
}

impl MemoryStats {
    /// Read the current figures from the operating system
    #[must_use]
    pub fn current() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            total: system.total_memory(),
            available: system.available_memory(),
            swap_total: system.total_swap(),
            swap_free: system.free_swap(),
        }
    }
}

/// Resolves memory and swap size facts
#[derive(Debug, Default)]
pub struct MemoryResolver {
    /// Fixed figures instead of reading the system
    stats: Option<MemoryStats>,
}

impl MemoryResolver {
    /// Create a resolver reading the live system
    #[must_use]
    pub fn new() -> Self {
        Self { stats: None }
    }

    /// Create a resolver reporting the given figures
    #[must_use]
    pub fn with_stats(stats: MemoryStats) -> Self {
        Self { stats: Some(stats) }
    }
}

/// Build a `{total, available, used, capacity, *_bytes}` map
fn usage_map(total: u64, available: u64) -> Value {
    let used = total.saturating_sub(available);
    [
        ("total".to_string(), Value::from(si_string(total))),
        ("available".to_string(), Value::from(si_string(available))),
        ("used".to_string(), Value::from(si_string(used))),
        ("capacity".to_string(), Value::from(percentage(used, total))),
        ("total_bytes".to_string(), bytes(total)),
        ("available_bytes".to_string(), bytes(available)),
        ("used_bytes".to_string(), bytes(used)),
    ]
    .into_iter()
    .collect()
}

fn bytes(n: u64) -> Value {
    Value::from(i64::try_from(n).unwrap_or(i64::MAX))
}

#[allow(clippy::cast_precision_loss)]
fn mebibytes(n: u64) -> Value {
    Value::from(format!("{:.2}", n as f64 / (1024.0 * 1024.0)))
}

impl Resolver for MemoryResolver {
    fn name(&self) -> &str {
        "memory"
    }

    fn names(&self) -> Vec<String> {
        [
            "memory",
            "memorysize",
            "memoryfree",
            "memorysize_mb",
            "memoryfree_mb",
            "swapsize",
            "swapfree",
            "swapsize_mb",
            "swapfree_mb",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn resolve(&mut self, facts: &mut Collection) -> Result<(), FactError> {
        let stats = self.stats.unwrap_or_else(MemoryStats::current);
        debug!(?stats, "resolved memory statistics");

        if stats.total == 0 {
            debug!("memory statistics unavailable on this platform");
            return Ok(());
        }

        facts.add("memorysize", Value::from(si_string(stats.total)))?;
        facts.add("memoryfree", Value::from(si_string(stats.available)))?;
        facts.add("memorysize_mb", mebibytes(stats.total))?;
        facts.add("memoryfree_mb", mebibytes(stats.available))?;

        let mut memory = vec![("system".to_string(), usage_map(stats.total, stats.available))];

        if stats.swap_total > 0 {
            facts.add("swapsize", Value::from(si_string(stats.swap_total)))?;
            facts.add("swapfree", Value::from(si_string(stats.swap_free)))?;
            facts.add("swapsize_mb", mebibytes(stats.swap_total))?;
            facts.add("swapfree_mb", mebibytes(stats.swap_free))?;
            memory.push((
                "swap".to_string(),
                usage_map(stats.swap_total, stats.swap_free),
            ));
        }

        facts.add("memory", memory.into_iter().collect::<Value>())
    }
}
