use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use microtask_core::{MicroTask, PanicPolicy};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::metrics::WorkerMetrics;
use super::placement::WorkerLoad;
use super::pool::{lock, PoolCounters, PoolShared};

/// The cross-thread half of a worker.
///
/// The active list itself lives on the worker's stack and is never shared;
/// other threads see it only through `snapshot`, which the worker
/// republishes after any cycle that changed it.
pub(crate) struct WorkerShared<T: MicroTask + ?Sized> {
    pub(crate) id: Uuid,
    pub(crate) seq: u64,
    pub(crate) started_at: DateTime<Utc>,
    pending: Mutex<VecDeque<Arc<T>>>,
    snapshot: Mutex<Vec<Arc<T>>>,
    active_len: AtomicUsize,
    /// Duration of the last full cycle in nanoseconds (dynamic placement only).
    run_time_nanos: AtomicU64,
    idle_ticks: AtomicU64,
    cycles: AtomicU64,
    cancel: AtomicBool,
}

impl<T: MicroTask + ?Sized> WorkerShared<T> {
    pub(crate) fn new(seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            started_at: Utc::now(),
            pending: Mutex::new(VecDeque::new()),
            snapshot: Mutex::new(Vec::new()),
            active_len: AtomicUsize::new(0),
            run_time_nanos: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            cancel: AtomicBool::new(false),
        }
    }

    /// Queue a task for admission on the worker's next cycle.
    pub(crate) fn enqueue(&self, task: Arc<T>) {
        lock(&self.pending).push_back(task);
    }

    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn load(&self) -> WorkerLoad {
        // The worker publishes `active_len` while holding the pending lock,
        // so reading both under it never sees a task in neither place.
        let pending = lock(&self.pending);
        WorkerLoad {
            active: self.active_len.load(Ordering::Relaxed),
            pending: pending.len(),
            last_cycle_nanos: self.run_time_nanos.load(Ordering::Relaxed),
        }
    }

    /// Append the worker's last published active list to `out`.
    pub(crate) fn extend_active(&self, out: &mut Vec<Arc<T>>) {
        out.extend(lock(&self.snapshot).iter().cloned());
    }

    pub(crate) fn metrics(&self) -> WorkerMetrics {
        let load = self.load();
        WorkerMetrics {
            id: self.id,
            active: load.active,
            pending: load.pending,
            last_cycle: Duration::from_nanos(load.last_cycle_nanos),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }
}

// ── Worker loop ───────────────────────────────────────────────

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Empty for `keep_alive_ticks` cycles; already removed from the pool.
    Idle,
    /// Cancel requested by `end_service`.
    Cancelled,
}

/// Deregisters the worker if its thread unwinds out of a task step.
struct UnwindGuard<'a, T: MicroTask + ?Sized> {
    pool: &'a PoolShared<T>,
    worker: &'a Arc<WorkerShared<T>>,
}

impl<T: MicroTask + ?Sized> Drop for UnwindGuard<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(
                worker = %self.worker.id,
                active = self.worker.active_len.load(Ordering::Relaxed),
                "task panicked, worker terminated and its tasks abandoned"
            );
            self.worker.cancel();
            self.pool.deregister(self.worker);
        }
    }
}

pub(crate) struct WorkerLoop<T: MicroTask + ?Sized> {
    pool: Arc<PoolShared<T>>,
    me: Arc<WorkerShared<T>>,
    active: Vec<Arc<T>>,
    idle_ticks: u64,
}

impl<T: MicroTask + ?Sized> WorkerLoop<T> {
    pub(crate) fn new(pool: Arc<PoolShared<T>>, me: Arc<WorkerShared<T>>) -> Self {
        Self {
            pool,
            me,
            active: Vec::new(),
            idle_ticks: 0,
        }
    }

    /// Cycle until retired or cancelled, then leave the pool.
    pub(crate) fn run(mut self) {
        let pool = Arc::clone(&self.pool);
        let me = Arc::clone(&self.me);
        let _guard = UnwindGuard { pool: &pool, worker: &me };

        debug!(worker = %me.id, seq = me.seq, "worker started");

        let exit = loop {
            if self.me.is_cancelled() {
                break Exit::Cancelled;
            }
            if let Some(exit) = self.cycle() {
                break exit;
            }
        };

        match exit {
            Exit::Idle => {}
            Exit::Cancelled => {
                let abandoned = self.active.len() + self.me.pending_len();
                self.pool.deregister(&self.me);
                info!(
                    worker = %self.me.id,
                    abandoned,
                    cycles = self.me.cycles.load(Ordering::Relaxed),
                    "worker stopped"
                );
            }
        }
    }

    /// One scheduling cycle: step, measure, admit, account for idleness.
    fn cycle(&mut self) -> Option<Exit> {
        let dynamic = self.pool.config.placement.is_dynamic();
        let started = dynamic.then(Instant::now);

        let before = self.active.len();
        let mut completed = 0u64;
        let mut panicked = 0u64;
        let policy = self.pool.config.panic_policy;
        let worker_id = self.me.id;

        // Finished tasks are dropped in place; relative order is preserved.
        self.active.retain(|task| {
            if task.is_finished() {
                completed += 1;
                return false;
            }
            match policy {
                PanicPolicy::AbortWorker => {
                    task.step();
                    true
                }
                PanicPolicy::Isolate => {
                    match panic::catch_unwind(AssertUnwindSafe(|| task.step())) {
                        Ok(()) => true,
                        Err(payload) => {
                            error!(
                                worker = %worker_id,
                                panic = %panic_message(payload.as_ref()),
                                "task step panicked, finishing task"
                            );
                            task.set_finished(true);
                            panicked += 1;
                            false
                        }
                    }
                }
            }
        });
        let mut changed = self.active.len() != before;
        PoolCounters::bump(&self.pool.counters.tasks_completed, completed);
        PoolCounters::bump(&self.pool.counters.task_panics, panicked);

        if let Some(started) = started {
            let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            self.me.run_time_nanos.store(nanos, Ordering::Relaxed);
        }

        {
            let mut pending = lock(&self.me.pending);
            if !pending.is_empty() {
                self.active.extend(pending.drain(..));
                changed = true;
            }
            self.me.active_len.store(self.active.len(), Ordering::Relaxed);
        }

        if changed {
            lock(&self.me.snapshot).clone_from(&self.active);
        }
        self.me.cycles.fetch_add(1, Ordering::Relaxed);

        if self.active.is_empty() {
            self.idle_ticks += 1;
            self.me.idle_ticks.store(self.idle_ticks, Ordering::Relaxed);
            if self.idle_ticks >= self.pool.config.keep_alive_ticks {
                if self.pool.try_retire(&self.me) {
                    return Some(Exit::Idle);
                }
                // A task arrived while we were deciding; it is admitted next cycle.
                self.reset_idle();
            } else if self.pool.config.idle_yield {
                thread::yield_now();
            }
        } else if self.idle_ticks > 0 {
            self.reset_idle();
        }
        None
    }

    fn reset_idle(&mut self) {
        self.idle_ticks = 0;
        self.me.idle_ticks.store(0, Ordering::Relaxed);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use microtask_core::{FnTask, SchedulerConfig, StepOutcome};

    use super::*;

    type DynTask = dyn MicroTask;

    fn finite(steps: u32) -> Arc<DynTask> {
        Arc::new(FnTask::new(0u32, move |n| {
            *n += 1;
            if *n >= steps {
                StepOutcome::Done
            } else {
                StepOutcome::Continue
            }
        }))
    }

    fn harness(config: SchedulerConfig) -> WorkerLoop<DynTask> {
        let pool = Arc::new(PoolShared::new(config));
        let me = Arc::new(WorkerShared::new(0));
        pool.write_workers().push(Arc::clone(&me));
        WorkerLoop::new(pool, me)
    }

    #[test]
    fn admitted_task_is_not_stepped_in_its_first_cycle() {
        let mut w = harness(SchedulerConfig::default());
        let task = finite(1);
        w.me.enqueue(Arc::clone(&task));

        assert_eq!(w.cycle(), None);
        assert!(!task.is_finished(), "drained after the step phase");
        assert_eq!(w.active.len(), 1);

        w.cycle();
        assert!(task.is_finished());
        assert_eq!(w.active.len(), 1, "dropped on the following cycle");

        w.cycle();
        assert!(w.active.is_empty());
        assert_eq!(w.pool.counters.tasks_completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn snapshot_tracks_active_list() {
        let mut w = harness(SchedulerConfig::default());
        let a = finite(100);
        let b = finite(100);
        w.me.enqueue(Arc::clone(&a));
        w.me.enqueue(Arc::clone(&b));
        w.cycle();

        let mut seen = Vec::new();
        w.me.extend_active(&mut seen);
        assert_eq!(seen.len(), 2);
        assert!(Arc::ptr_eq(&seen[0], &a));
        assert!(Arc::ptr_eq(&seen[1], &b));

        a.set_finished(true);
        w.cycle();
        let mut seen = Vec::new();
        w.me.extend_active(&mut seen);
        assert_eq!(seen.len(), 1);
        assert!(Arc::ptr_eq(&seen[0], &b));
    }

    #[test]
    fn idle_worker_retires_after_keep_alive() {
        let mut w = harness(SchedulerConfig::default().with_keep_alive_ticks(3));
        assert_eq!(w.cycle(), None);
        assert_eq!(w.cycle(), None);
        assert_eq!(w.cycle(), Some(Exit::Idle));
        assert!(w.pool.read_workers().is_empty());
        assert!(w.me.is_cancelled());
        assert_eq!(w.pool.counters.workers_retired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn work_resets_idle_counter() {
        let mut w = harness(SchedulerConfig::default().with_keep_alive_ticks(3));
        w.cycle();
        w.cycle();
        w.me.enqueue(finite(1));
        assert_eq!(w.cycle(), None);
        assert_eq!(w.idle_ticks, 0);
        assert_eq!(w.me.idle_ticks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn retirement_aborted_when_pending_arrives() {
        let w = harness(SchedulerConfig::default().with_keep_alive_ticks(1));
        w.me.enqueue(finite(1));
        assert!(!w.pool.try_retire(&w.me));
        assert_eq!(w.pool.read_workers().len(), 1);
    }

    #[test]
    fn isolated_panic_finishes_task_and_keeps_others() {
        let mut w = harness(SchedulerConfig::default());
        let bad: Arc<DynTask> = Arc::new(FnTask::new((), |_| panic!("step exploded")));
        let good = finite(1000);
        w.me.enqueue(Arc::clone(&bad));
        w.me.enqueue(Arc::clone(&good));
        w.cycle();
        w.cycle();

        assert!(bad.is_finished());
        assert!(!good.is_finished());
        assert_eq!(w.active.len(), 1);
        assert_eq!(w.pool.counters.task_panics.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn run_time_recorded_only_in_dynamic_mode() {
        let slow = || -> Arc<DynTask> {
            Arc::new(FnTask::new((), |_| {
                thread::sleep(Duration::from_millis(2));
                StepOutcome::Continue
            }))
        };

        let mut w = harness(SchedulerConfig::default());
        w.me.enqueue(slow());
        w.cycle();
        w.cycle();
        assert_eq!(w.me.load().last_cycle_nanos, 0);

        let mut w = harness(SchedulerConfig::pooled(1, microtask_core::PlacementMode::Dynamic));
        w.me.enqueue(slow());
        w.cycle();
        w.cycle();
        assert!(w.me.load().last_cycle_nanos >= 2_000_000);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
