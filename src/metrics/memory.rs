//! System memory usage via sysinfo.

use crate::metrics::data::MemoryUsage;
use std::sync::Mutex;
use sysinfo::System;

/// Reads total and available memory on demand.
///
/// Unlike CPU load this is cheap enough to read on the query path.
pub struct MemorySampler {
    system: Mutex<System>,
}

impl MemorySampler {
    /// Create a sampler with an empty sysinfo handle.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Refresh memory counters and compute usage.
    ///
    /// A poisoned lock is recovered; the `System` handle holds no invariant
    /// a panicking reader could break.
    pub fn sample(&self) -> MemoryUsage {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();

        let usage = MemoryUsage::from_totals(system.total_memory(), system.available_memory());
        if usage.total_bytes == 0 {
            tracing::warn!("total memory reported as zero");
        }
        usage
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
