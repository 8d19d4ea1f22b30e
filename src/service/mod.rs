//! Background sampling service.
//!
//! A [`PeriodicScheduler`] owns the worker thread and is the only writer of
//! its [`SampleSlot`]; any number of [`CpuUsageQuery`] handles read it.
//! [`MonitorService`] ties the scheduler's lifetime to the host's.

pub mod monitor;
pub mod query;
pub mod scheduler;
pub mod slot;

pub use monitor::MonitorService;
pub use query::CpuUsageQuery;
pub use scheduler::PeriodicScheduler;
pub use slot::SampleSlot;
