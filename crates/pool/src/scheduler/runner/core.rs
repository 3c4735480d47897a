use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use microtask_core::{MicroTask, Result, SchedulerConfig};
use tracing::{debug, info};

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::pool::PoolShared;

/// Poll interval for [`Scheduler::wait_for_workers`].
const WAIT_POLL: Duration = Duration::from_millis(1);

/// The micro-task scheduler. Spreads [`MicroTask`]s over a bounded pool of
/// worker threads, each stepping its tasks once per cycle.
///
/// Generic over the task type; the default `dyn MicroTask` accepts any mix
/// of task implementations. All methods take `&self` and may be called from
/// any thread.
///
/// A task step that panics is handled per the configured
/// [`PanicPolicy`](microtask_core::PanicPolicy). Under `AbortWorker` the
/// panic is fatal to its worker: every other task on that worker is
/// abandoned without further steps.
pub struct Scheduler<T: MicroTask + ?Sized + 'static = dyn MicroTask> {
    pub(super) pool: Arc<PoolShared<T>>,
}

impl<T: MicroTask + ?Sized + 'static> Scheduler<T> {
    /// Create a scheduler. No worker threads start until the first `add`.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            max_workers = config.max_workers,
            placement = %config.placement,
            keep_alive_ticks = config.keep_alive_ticks,
            "scheduler created"
        );
        Ok(Self {
            pool: Arc::new(PoolShared::new(config)),
        })
    }

    /// A scheduler with a single worker and static placement.
    pub fn single() -> Self {
        Self {
            pool: Arc::new(PoolShared::new(SchedulerConfig::single())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.pool.config
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.pool.read_workers().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.pool.is_shutting_down()
    }

    /// Get a snapshot of the current pool metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let counters = &self.pool.counters;
        let workers = self
            .pool
            .workers_snapshot()
            .iter()
            .map(|w| w.metrics())
            .collect();

        SchedulerMetrics {
            max_workers: self.pool.config.max_workers,
            placement: self.pool.config.placement,
            shutting_down: self.is_shutting_down(),
            tasks_admitted: counters.tasks_admitted.load(Ordering::Relaxed),
            tasks_completed: counters.tasks_completed.load(Ordering::Relaxed),
            task_panics: counters.task_panics.load(Ordering::Relaxed),
            workers_spawned: counters.workers_spawned.load(Ordering::Relaxed),
            workers_retired: counters.workers_retired.load(Ordering::Relaxed),
            workers,
        }
    }

    /// Block until every worker has left the pool, or `timeout` elapses.
    /// Returns whether the pool drained.
    ///
    /// Workers only leave after retiring idle or after `end_service`, so
    /// call this once no more work is expected.
    pub fn wait_for_workers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.worker_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::single()
    }
}

impl<T: MicroTask + ?Sized + 'static> Drop for Scheduler<T> {
    fn drop(&mut self) {
        if !self.is_shutting_down() {
            info!("Scheduler dropped, stopping workers");
            self.end_service();
        }
    }
}
