//! The single published-value cell shared by the scheduler and its readers.

use crate::config::EstimatorKind;
use crate::metrics::data::{SamplerHealth, UtilizationSample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Bookkeeping guarded by the slot mutex.
#[derive(Debug, Default)]
struct SlotInner {
    /// Bumped on every start and stop. A worker may only publish under the
    /// epoch it was started with.
    epoch: u64,
    health: SamplerHealth,
}

/// Latest CPU utilization value plus tick-loop health.
///
/// The value lives in an atomic as `f64` bits so readers never lock. Every
/// write of it happens inside the mutex together with the epoch check, so a
/// tick that finishes after `stop()` cannot resurrect a stale value.
#[derive(Debug)]
pub struct SampleSlot {
    value: AtomicU64,
    inner: Mutex<SlotInner>,
    samples: watch::Sender<Option<UtilizationSample>>,
}

impl SampleSlot {
    /// An empty slot reading `0.0`.
    pub fn new() -> Self {
        let (samples, _) = watch::channel(None);
        Self {
            value: AtomicU64::new(0.0_f64.to_bits()),
            inner: Mutex::new(SlotInner::default()),
            samples,
        }
    }

    /// The last published value, `0.0` if none or if stopped.
    pub fn value(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Acquire))
    }

    /// The last published sample with its timestamp.
    pub fn latest(&self) -> Option<UtilizationSample> {
        *self.samples.borrow()
    }

    /// A snapshot of the tick-loop diagnostics.
    pub fn health(&self) -> SamplerHealth {
        self.lock().health.clone()
    }

    /// Whether a run is currently open.
    pub fn is_running(&self) -> bool {
        self.lock().health.running
    }

    /// Receive every published sample, and `None` on each reset.
    pub fn subscribe(&self) -> watch::Receiver<Option<UtilizationSample>> {
        self.samples.subscribe()
    }

    /// Open a new run and return the epoch its worker must publish under.
    pub(crate) fn begin_run(&self) -> u64 {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.health.running = true;
        inner.health.consecutive_failures = 0;
        self.reset_value(&mut inner);
        inner.epoch
    }

    /// Close the current run and reset the value to `0.0`.
    ///
    /// Returns whether a run was open. Safe to call at any time.
    pub(crate) fn end_run(&self) -> bool {
        let mut inner = self.lock();
        let was_running = inner.health.running;
        inner.epoch += 1;
        inner.health.running = false;
        self.reset_value(&mut inner);
        was_running
    }

    /// Publish a value for the run identified by `epoch`.
    ///
    /// Returns `false` and leaves the slot untouched if that run has ended.
    pub(crate) fn publish(&self, epoch: u64, value: f64, estimator: EstimatorKind) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }

        let sample = UtilizationSample::new(value, estimator);
        self.value.store(value.to_bits(), Ordering::Release);
        inner.health.ticks += 1;
        inner.health.consecutive_failures = 0;
        inner.health.last_sample = Some(sample);
        self.samples.send_replace(Some(sample));
        true
    }

    /// Record a failed tick for the run identified by `epoch`.
    pub(crate) fn record_failure(&self, epoch: u64, message: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }

        inner.health.failures += 1;
        inner.health.consecutive_failures += 1;
        inner.health.last_error = Some(message.into());
        true
    }

    /// Publish the fail-soft `0.0` for a tick whose reads failed, counting
    /// it as a failure rather than a tick.
    pub(crate) fn publish_fallback(
        &self,
        epoch: u64,
        estimator: EstimatorKind,
        message: impl Into<String>,
    ) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }

        let sample = UtilizationSample::new(0.0, estimator);
        self.value.store(0.0_f64.to_bits(), Ordering::Release);
        inner.health.failures += 1;
        inner.health.consecutive_failures += 1;
        inner.health.last_error = Some(message.into());
        inner.health.last_sample = Some(sample);
        self.samples.send_replace(Some(sample));
        true
    }

    fn reset_value(&self, inner: &mut SlotInner) {
        self.value.store(0.0_f64.to_bits(), Ordering::Release);
        inner.health.last_sample = None;
        self.samples.send_replace(None);
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SampleSlot {
    fn default() -> Self {
        Self::new()
    }
}
