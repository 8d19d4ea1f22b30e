//! Fixed-rate background sampling loop.
//!
//! Each run owns one dedicated OS thread driving a current-thread tokio
//! runtime. Ticks fire at `0, cadence, 2 * cadence, ...` from the start of
//! the run; a tick that overruns makes the next one start right after it.
//! Estimators do blocking file reads, which is fine on a thread nobody else
//! shares.

use crate::config::{EstimatorKind, SamplerConfig};
use crate::error::{PulseError, Result};
use crate::metrics::{build_estimator, CpuLoadEstimator};
use crate::metrics::data::SamplerState;
use crate::service::query::CpuUsageQuery;
use crate::service::slot::SampleSlot;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Name given to every sampler worker thread.
pub const WORKER_THREAD_NAME: &str = "system-pulse-sampler";

/// A started run.
struct Worker {
    epoch: u64,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    active: Option<Worker>,
    /// Stopped workers not yet joined.
    retired: Vec<JoinHandle<()>>,
}

/// Runs one CPU load estimator at a fixed cadence and publishes into a
/// [`SampleSlot`].
///
/// All methods take `&self` and may be called from any thread.
pub struct PeriodicScheduler {
    estimator: Arc<dyn CpuLoadEstimator>,
    slot: Arc<SampleSlot>,
    cadence_ms: AtomicU64,
    control: Mutex<Control>,
}

impl PeriodicScheduler {
    /// Create a stopped scheduler with its own slot.
    pub fn new(estimator: Arc<dyn CpuLoadEstimator>, cadence: Duration) -> Self {
        Self::with_slot(estimator, Arc::new(SampleSlot::new()), cadence)
    }

    /// Create a stopped scheduler publishing into an existing slot.
    pub fn with_slot(
        estimator: Arc<dyn CpuLoadEstimator>,
        slot: Arc<SampleSlot>,
        cadence: Duration,
    ) -> Self {
        Self {
            estimator,
            slot,
            cadence_ms: AtomicU64::new(cadence_millis(cadence)),
            control: Mutex::new(Control::default()),
        }
    }

    /// Create a stopped scheduler running the configured estimator.
    pub fn from_config(config: &SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(build_estimator(config), config.cadence()))
    }

    /// Start sampling at the current cadence.
    ///
    /// A running loop is stopped first, so there is never more than one.
    /// The first tick fires immediately.
    pub fn start(&self) -> Result<()> {
        let cadence = self.cadence();
        if cadence.is_zero() {
            return Err(PulseError::config_error("sampling cadence must be non-zero"));
        }

        let mut control = self.lock_control();
        if control.active.is_some() {
            debug!("sampler already running, restarting");
            self.stop_locked(&mut control);
        }
        control.retired.retain(|handle| !handle.is_finished());

        let epoch = self.slot.begin_run();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let estimator = Arc::clone(&self.estimator);
        let slot = Arc::clone(&self.slot);

        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(estimator, slot, cadence, epoch, shutdown_rx));

        match spawned {
            Ok(handle) => {
                control.active = Some(Worker {
                    epoch,
                    shutdown,
                    handle,
                });
                info!(
                    epoch,
                    cadence_ms = cadence_millis(cadence),
                    estimator = %self.estimator.kind(),
                    "CPU sampling started"
                );
                Ok(())
            }
            Err(err) => {
                self.slot.end_run();
                Err(PulseError::worker_error(format!(
                    "failed to spawn sampler thread: {}",
                    err
                )))
            }
        }
    }

    /// Change the cadence and (re)start.
    pub fn start_with_cadence(&self, cadence_ms: u64) -> Result<()> {
        if cadence_ms == 0 {
            return Err(PulseError::config_error("sampling cadence must be non-zero"));
        }
        self.cadence_ms.store(cadence_ms, Ordering::Release);
        self.start()
    }

    /// Stop sampling and reset the published value to `0.0`.
    ///
    /// Does not wait for an in-flight tick; its result is discarded when it
    /// lands. Use [`PeriodicScheduler::shutdown`] to wait for the thread.
    pub fn stop(&self) {
        let mut control = self.lock_control();
        self.stop_locked(&mut control);
    }

    /// Stop sampling and join every worker thread this scheduler started.
    ///
    /// Returns how many threads were joined; `0` once already shut down.
    pub fn shutdown(&self) -> usize {
        let retired = {
            let mut control = self.lock_control();
            self.stop_locked(&mut control);
            std::mem::take(&mut control.retired)
        };

        let joined = retired.len();
        for handle in retired {
            if handle.join().is_err() {
                error!("sampler worker thread panicked");
            }
        }
        if joined > 0 {
            debug!(joined, "sampler workers joined");
        }
        joined
    }

    /// Whether a tick loop is active.
    pub fn is_running(&self) -> bool {
        self.lock_control().active.is_some()
    }

    /// The current cadence.
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms.load(Ordering::Acquire))
    }

    /// Which strategy this scheduler runs.
    pub fn estimator_kind(&self) -> EstimatorKind {
        self.estimator.kind()
    }

    /// Running flag, last value and cadence in one snapshot.
    pub fn state(&self) -> SamplerState {
        SamplerState {
            running: self.is_running(),
            last_value: self.slot.value(),
            cadence_ms: self.cadence_ms.load(Ordering::Acquire),
        }
    }

    /// A read-only handle onto the published value.
    pub fn query(&self) -> CpuUsageQuery {
        CpuUsageQuery::new(Arc::clone(&self.slot))
    }

    fn stop_locked(&self, control: &mut Control) {
        if let Some(worker) = control.active.take() {
            // The worker may already be gone; nothing to signal then.
            let _ = worker.shutdown.send(true);
            control.retired.push(worker.handle);
            info!(epoch = worker.epoch, "CPU sampling stopped");
        }
        self.slot.end_run();
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Whole milliseconds, rounding a non-zero sub-millisecond cadence up to 1.
fn cadence_millis(cadence: Duration) -> u64 {
    if cadence.is_zero() {
        return 0;
    }
    u64::try_from(cadence.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of the worker thread.
fn run_worker(
    estimator: Arc<dyn CpuLoadEstimator>,
    slot: Arc<SampleSlot>,
    cadence: Duration,
    epoch: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(epoch, error = %err, "failed to build sampler runtime");
            slot.record_failure(epoch, format!("runtime: {}", err));
            return;
        }
    };

    runtime.block_on(async move {
        let mut ticker = time::interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        loop {
            tokio::select! {
                biased;
                // Fires on stop and when the scheduler is dropped.
                _ = shutdown.changed() => break,
                _ = ticker.tick() => run_tick(estimator.as_ref(), &slot, epoch),
            }
        }
    });

    debug!(epoch, "sampler worker exited");
}

/// One tick: sample, then publish the value or the failure.
///
/// A read error publishes the fail-soft `0.0` so hosts never keep showing a
/// stale load. Panics and non-finite values leave the last value in place.
fn run_tick(estimator: &dyn CpuLoadEstimator, slot: &SampleSlot, epoch: u64) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| estimator.try_sample()));

    let failure = match outcome {
        Ok(Ok(value)) if value.is_finite() => {
            let value = value.clamp(0.0, 100.0);
            if slot.publish(epoch, value, estimator.kind()) {
                debug!(epoch, value, "published CPU sample");
            }
            return;
        }
        Ok(Err(err)) => {
            let failure = err.to_string();
            if slot.publish_fallback(epoch, estimator.kind(), failure.clone()) {
                warn!(epoch, error = %failure, "CPU sample failed, published 0.0");
            }
            return;
        }
        Ok(Ok(value)) => format!("estimator returned non-finite value {}", value),
        Err(payload) => format!("estimator panicked: {}", panic_message(payload.as_ref())),
    };

    if slot.record_failure(epoch, failure.clone()) {
        warn!(epoch, error = %failure, "CPU sample tick failed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ElapsedRatioSampler, FrequencySampler, ProcessClock, StaticFrequencySource};
    use std::sync::atomic::AtomicUsize;

    /// Returns a fixed value and counts calls.
    struct CountingEstimator {
        value: f64,
        calls: AtomicUsize,
    }

    impl CountingEstimator {
        fn new(value: f64) -> Arc<Self> {
            Arc::new(Self {
                value,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl CpuLoadEstimator for CountingEstimator {
        fn kind(&self) -> EstimatorKind {
            EstimatorKind::Frequency
        }

        fn try_sample(&self) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }
    }

    struct PanickingEstimator;

    impl CpuLoadEstimator for PanickingEstimator {
        fn kind(&self) -> EstimatorKind {
            EstimatorKind::ElapsedRatio
        }

        fn try_sample(&self) -> Result<f64> {
            panic!("counter exploded");
        }
    }

    /// Readable for the first `good_reads` CPU-time reads, unavailable after.
    struct FlakyClock {
        good_reads: usize,
        reads: AtomicUsize,
    }

    impl ProcessClock for FlakyClock {
        fn cpu_time(&self) -> Result<Duration> {
            if self.reads.fetch_add(1, Ordering::SeqCst) < self.good_reads {
                Ok(Duration::from_millis(500))
            } else {
                Err(PulseError::unavailable("/proc/self/stat"))
            }
        }

        fn elapsed(&self) -> Result<Duration> {
            Ok(Duration::from_millis(1000))
        }

        fn core_count(&self) -> usize {
            4
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_stop_before_start() {
        let scheduler = PeriodicScheduler::new(CountingEstimator::new(10.0), Duration::from_secs(1));
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.query().current_cpu_usage(), 0.0);
    }

    #[test]
    fn test_first_tick_is_immediate() {
        let source = StaticFrequencySource::new(2)
            .with_core(0, 1000, 2000)
            .with_core(1, 1000, 2000);
        let estimator = Arc::new(FrequencySampler::with_source(source));
        let scheduler = PeriodicScheduler::new(estimator, Duration::from_secs(60));
        let query = scheduler.query();

        scheduler.start().unwrap();
        assert!(wait_for(|| query.current_cpu_usage() > 0.0));
        assert_eq!(query.current_cpu_usage(), 50.0);

        let state = scheduler.state();
        assert!(state.running);
        assert_eq!(state.last_value, 50.0);
        assert_eq!(state.cadence_ms, 60_000);

        scheduler.shutdown();
    }

    #[test]
    fn test_stop_clears_value() {
        let scheduler = PeriodicScheduler::new(CountingEstimator::new(33.0), Duration::from_millis(20));
        let query = scheduler.query();
        scheduler.start().unwrap();
        assert!(wait_for(|| query.current_cpu_usage() == 33.0));

        scheduler.stop();
        assert_eq!(query.current_cpu_usage(), 0.0);
        assert!(!scheduler.is_running());
        assert!(query.latest_sample().is_none());
        scheduler.shutdown();
    }

    #[test]
    fn test_panicking_estimator_is_contained() {
        let scheduler = PeriodicScheduler::new(Arc::new(PanickingEstimator), Duration::from_millis(20));
        let query = scheduler.query();
        scheduler.start().unwrap();

        assert!(wait_for(|| query.health().failures >= 2));
        let health = query.health();
        assert!(health.running);
        assert!(health.last_error.unwrap().contains("counter exploded"));
        assert_eq!(query.current_cpu_usage(), 0.0);
        assert!(scheduler.is_running());

        scheduler.shutdown();
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let scheduler = PeriodicScheduler::new(CountingEstimator::new(1.0), Duration::ZERO);
        assert!(scheduler.start().is_err());
        assert!(scheduler.start_with_cadence(0).is_err());
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_start_with_cadence_updates_state() {
        let scheduler = PeriodicScheduler::new(CountingEstimator::new(1.0), Duration::from_secs(1));
        scheduler.start_with_cadence(250).unwrap();
        assert_eq!(scheduler.cadence(), Duration::from_millis(250));
        assert_eq!(scheduler.state().cadence_ms, 250);
        scheduler.shutdown();
    }

    #[test]
    fn test_panic_message_formats() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_failed_reads_publish_zero() {
        let clock = FlakyClock {
            good_reads: 1,
            reads: AtomicUsize::new(0),
        };
        let estimator = Arc::new(ElapsedRatioSampler::with_clock(clock));
        let scheduler = PeriodicScheduler::new(estimator, Duration::from_millis(50));
        let query = scheduler.query();

        scheduler.start().unwrap();
        assert!(wait_for(|| query.health().failures >= 3));

        assert_eq!(query.current_cpu_usage(), 0.0);
        let health = query.health();
        assert_eq!(health.ticks, 1);
        assert!(health.consecutive_failures >= 3);
        assert!(health.last_error.unwrap().contains("/proc/self/stat"));
        assert_eq!(query.latest_sample().map(|s| s.value), Some(0.0));
        assert!(scheduler.is_running());

        scheduler.shutdown();
    }

    #[test]
    fn test_sub_millisecond_cadence_rounds_up() {
        let scheduler = PeriodicScheduler::new(CountingEstimator::new(1.0), Duration::from_micros(500));
        assert_eq!(scheduler.cadence(), Duration::from_millis(1));
        assert!(scheduler.start().is_ok());
        scheduler.shutdown();

        assert_eq!(cadence_millis(Duration::ZERO), 0);
        assert_eq!(cadence_millis(Duration::from_micros(1500)), 1);
        assert_eq!(cadence_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_shutdown_joins_once() {
        let scheduler = PeriodicScheduler::new(CountingEstimator::new(1.0), Duration::from_millis(100));
        scheduler.start().unwrap();
        scheduler.start().unwrap();

        // The restarted worker may already have exited and been reaped.
        let joined = scheduler.shutdown();
        assert!((1..=2).contains(&joined), "joined {} workers", joined);
        assert_eq!(scheduler.shutdown(), 0);
        assert!(!scheduler.is_running());
    }
}
