use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use microtask_core::{MicroTask, Result, SchedulerError};
use tracing::{debug, info};

use crate::scheduler::placement::select_worker;
use crate::scheduler::pool::PoolCounters;
use crate::scheduler::worker::{WorkerLoop, WorkerShared};

use super::Scheduler;

impl<T: MicroTask + ?Sized + 'static> Scheduler<T> {
    /// Admit a task.
    ///
    /// While the pool is under `max_workers`, every admission starts a new
    /// worker holding just this task. Once full, the task is queued on the
    /// worker chosen by the placement policy. The task starts stepping on
    /// its worker's next cycle.
    ///
    /// Fails with [`SchedulerError::ShuttingDown`] after [`end_service`](Self::end_service),
    /// or [`SchedulerError::Spawn`] if the OS refuses a new thread; in both
    /// cases the task was not admitted.
    pub fn add(&self, task: Arc<T>) -> Result<()> {
        if self.pool.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }

        let mut workers = self.pool.write_workers();
        // end_service sets the flag before taking the lock.
        if self.pool.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }

        let mode = self.pool.config.placement;
        let placed = if workers.len() < self.pool.config.max_workers {
            None
        } else {
            select_worker(mode, workers.iter().map(|w| w.load()))
                .and_then(|idx| workers.get(idx))
                .map(Arc::clone)
        };

        // An empty pool has nowhere to place, so it always spawns.
        match placed {
            Some(target) => {
                debug!(worker = %target.id, placement = %mode, "task placed on existing worker");
                target.enqueue(task);
            }
            None => {
                let worker = self.spawn_worker(task)?;
                workers.push(worker);
            }
        }

        PoolCounters::bump(&self.pool.counters.tasks_admitted, 1);
        Ok(())
    }

    /// Start a worker thread whose pending queue already holds `first`.
    fn spawn_worker(&self, first: Arc<T>) -> Result<Arc<WorkerShared<T>>> {
        let seq = self.pool.next_seq();
        let worker = Arc::new(WorkerShared::new(seq));
        worker.enqueue(first);

        let worker_loop = WorkerLoop::new(Arc::clone(&self.pool), Arc::clone(&worker));
        thread::Builder::new()
            .name(format!("{}-{}", self.pool.config.thread_name_prefix, seq))
            .spawn(move || worker_loop.run())
            .map_err(SchedulerError::Spawn)?;

        PoolCounters::bump(&self.pool.counters.workers_spawned, 1);
        info!(worker = %worker.id, seq, "worker spawned");
        Ok(worker)
    }

    /// Force-finish a task.
    ///
    /// Only sets the task's finished flag; the owning worker drops it on its
    /// next cycle. Safe to call on a task that is not scheduled, or twice.
    pub fn remove(&self, task: &T) {
        task.set_finished(true);
    }

    /// Snapshot of every worker's active list, in pool order.
    ///
    /// Best effort: a task may be about to be dropped, and tasks still in a
    /// pending queue are not included.
    pub fn active_tasks(&self) -> Vec<Arc<T>> {
        let mut out = Vec::new();
        for worker in self.pool.workers_snapshot() {
            worker.extend_active(&mut out);
        }
        out
    }

    /// Stop accepting tasks and ask every worker to exit after its current
    /// cycle. Does not wait; see [`wait_for_workers`](Self::wait_for_workers).
    pub fn end_service(&self) {
        self.pool.shutting_down.store(true, Ordering::Release);
        let workers = self.pool.read_workers();
        for worker in workers.iter() {
            worker.cancel();
        }
        info!(workers = workers.len(), "Scheduler shutdown requested");
    }
}
