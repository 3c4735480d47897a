//! Cooperative micro-task scheduler backed by a bounded pool of worker threads.
//!
//! Each worker owns a private list of tasks and steps every unfinished task
//! once per cycle, dropping finished ones. New tasks go to a fresh worker
//! while the pool is under capacity, otherwise to the worker picked by the
//! configured [`PlacementMode`](microtask_core::PlacementMode). Workers
//! that stay empty for `keep_alive_ticks` cycles retire and deregister.

pub mod metrics;
pub mod placement;
pub(crate) mod pool;
pub mod runner;
pub(crate) mod worker;

pub use metrics::{SchedulerMetrics, WorkerMetrics};
pub use placement::{select_worker, WorkerLoad};
pub use runner::Scheduler;
