use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use microtask_core::{MicroTask, SchedulerConfig};
use tracing::info;

use super::worker::WorkerShared;

/// State shared between the [`Scheduler`](super::Scheduler) handle and every
/// worker thread.
pub(crate) struct PoolShared<T: MicroTask + ?Sized> {
    pub(crate) config: SchedulerConfig,
    /// Live workers in spawn order. Workers remove themselves on exit.
    pub(crate) workers: RwLock<Vec<Arc<WorkerShared<T>>>>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) counters: PoolCounters,
    next_seq: AtomicU64,
}

/// Monotonic pool counters. Relaxed: they only feed metrics.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) tasks_admitted: AtomicU64,
    pub(crate) tasks_completed: AtomicU64,
    pub(crate) task_panics: AtomicU64,
    pub(crate) workers_spawned: AtomicU64,
    pub(crate) workers_retired: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        if by > 0 {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }
}

impl<T: MicroTask + ?Sized> PoolShared<T> {
    pub(crate) fn new(config: SchedulerConfig) -> Self {
        Self {
            workers: RwLock::new(Vec::with_capacity(config.max_workers)),
            config,
            shutting_down: AtomicBool::new(false),
            counters: PoolCounters::default(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn read_workers(&self) -> RwLockReadGuard<'_, Vec<Arc<WorkerShared<T>>>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_workers(&self) -> RwLockWriteGuard<'_, Vec<Arc<WorkerShared<T>>>> {
        self.workers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the live worker list; enumeration never holds the pool lock
    /// while touching individual workers.
    pub(crate) fn workers_snapshot(&self) -> Vec<Arc<WorkerShared<T>>> {
        self.read_workers().clone()
    }

    /// Retire an idle worker unless a task slipped into its pending queue.
    ///
    /// Admission enqueues under the pool write lock, so checking the queue
    /// under the same lock means no task is handed to a worker that is
    /// already gone.
    pub(crate) fn try_retire(&self, worker: &Arc<WorkerShared<T>>) -> bool {
        let mut workers = self.write_workers();
        if worker.pending_len() > 0 {
            return false;
        }
        workers.retain(|w| !Arc::ptr_eq(w, worker));
        worker.cancel();
        PoolCounters::bump(&self.counters.workers_retired, 1);
        info!(
            worker = %worker.id,
            idle_ticks = self.config.keep_alive_ticks,
            live_workers = workers.len(),
            "worker retired after idle period"
        );
        true
    }

    /// Remove a worker from the live list. No-op if it is already gone.
    pub(crate) fn deregister(&self, worker: &Arc<WorkerShared<T>>) {
        self.write_workers().retain(|w| !Arc::ptr_eq(w, worker));
    }
}

/// Lock a mutex, recovering the data if a holder panicked. None of the
/// pool's mutexes are held across task code, so the data stays consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
