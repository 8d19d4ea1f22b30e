//! Read-only access to the published CPU utilization.

use crate::metrics::data::{SamplerHealth, UtilizationSample};
use crate::service::slot::SampleSlot;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

/// Cloneable handle for hosts that poll the sampler.
///
/// Every method reads memory only: no file I/O, no waiting on the worker.
#[derive(Debug, Clone)]
pub struct CpuUsageQuery {
    slot: Arc<SampleSlot>,
}

impl CpuUsageQuery {
    /// Wrap a slot.
    pub fn new(slot: Arc<SampleSlot>) -> Self {
        Self { slot }
    }

    /// The most recently published CPU load, or `0.0` if nothing has been
    /// published since the last start or the sampler is stopped.
    pub fn current_cpu_usage(&self) -> f64 {
        self.slot.value()
    }

    /// The most recently published sample with its timestamp.
    pub fn latest_sample(&self) -> Option<UtilizationSample> {
        self.slot.latest()
    }

    /// Tick counters and last error of the sampling loop.
    pub fn health(&self) -> SamplerHealth {
        self.slot.health()
    }

    /// Whether a sampling run is open.
    pub fn is_running(&self) -> bool {
        self.slot.is_running()
    }

    /// Stream of published samples. Yields the current value first; `None`
    /// marks a stop.
    pub fn subscribe(&self) -> WatchStream<Option<UtilizationSample>> {
        WatchStream::new(self.slot.subscribe())
    }
}
