#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use microtask_core::{FinishFlag, MicroTask, PlacementMode, SchedulerConfig, SchedulerError};

    use crate::scheduler::runner::Scheduler;

    const TIMEOUT: Duration = Duration::from_secs(10);

    /// Mock task that counts its steps and never finishes on its own.
    #[derive(Default)]
    struct MockTask {
        steps: AtomicU64,
        finished: FinishFlag,
    }

    impl MockTask {
        fn step_count(&self) -> u64 {
            self.steps.load(Ordering::Relaxed)
        }
    }

    impl MicroTask for MockTask {
        fn step(&self) {
            self.steps.fetch_add(1, Ordering::Relaxed);
        }
        fn is_finished(&self) -> bool {
            self.finished.get()
        }
        fn set_finished(&self, finished: bool) {
            self.finished.set(finished);
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn config(max_workers: usize) -> SchedulerConfig {
        // Large keep-alive so idle retirement never interferes.
        SchedulerConfig::pooled(max_workers, PlacementMode::Static).with_keep_alive_ticks(u64::MAX)
    }

    #[test]
    fn scheduler_creation_starts_no_workers() {
        let scheduler: Scheduler<MockTask> = Scheduler::new(config(4)).unwrap();
        assert_eq!(scheduler.worker_count(), 0);
        assert!(!scheduler.is_shutting_down());
        assert_eq!(scheduler.config().max_workers, 4);
    }

    #[test]
    fn invalid_config_rejected() {
        let result = Scheduler::<MockTask>::new(config(0));
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[test]
    fn default_is_single_static_worker() {
        let scheduler: Scheduler = Scheduler::default();
        assert_eq!(scheduler.config().max_workers, 1);
        assert_eq!(scheduler.config().placement, PlacementMode::Static);
    }

    #[test]
    fn concurrent_admission_respects_capacity() {
        let scheduler: Arc<Scheduler<MockTask>> = Arc::new(Scheduler::new(config(3)).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&scheduler);
                thread::spawn(move || {
                    for _ in 0..25 {
                        s.add(Arc::new(MockTask::default())).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(scheduler.worker_count(), 3);
        let metrics = scheduler.metrics();
        assert_eq!(metrics.workers_spawned, 3);
        assert_eq!(metrics.tasks_admitted, 200);
        assert!(wait_until(|| scheduler.active_tasks().len() == 200));
    }

    #[test]
    fn full_pool_places_instead_of_spawning() {
        let scheduler: Scheduler<MockTask> = Scheduler::new(config(2)).unwrap();
        for _ in 0..2 {
            scheduler.add(Arc::new(MockTask::default())).unwrap();
        }
        for _ in 0..10 {
            assert!(scheduler.add(Arc::new(MockTask::default())).is_ok());
        }

        let metrics = scheduler.metrics();
        assert_eq!(scheduler.worker_count(), 2);
        assert_eq!(metrics.workers_spawned, 2);
        assert_eq!(metrics.tasks_admitted, 12);
        assert!(wait_until(|| scheduler.active_tasks().len() == 12));
    }

    #[test]
    fn removed_tasks_stop_stepping() {
        let scheduler: Scheduler<MockTask> = Scheduler::new(config(1)).unwrap();
        let a = Arc::new(MockTask::default());
        let b = Arc::new(MockTask::default());
        scheduler.add(Arc::clone(&a)).unwrap();
        scheduler.add(Arc::clone(&b)).unwrap();

        assert!(wait_until(|| a.step_count() > 100 && b.step_count() > 100));
        scheduler.remove(&a);
        assert!(wait_until(|| scheduler.active_tasks().len() == 1));

        let frozen = a.step_count();
        let running = b.step_count();
        assert!(wait_until(|| b.step_count() > running + 100));
        assert_eq!(a.step_count(), frozen);
    }

    #[test]
    fn end_service_cancels_every_worker() {
        let scheduler: Scheduler<MockTask> = Scheduler::new(config(4)).unwrap();
        for _ in 0..4 {
            scheduler.add(Arc::new(MockTask::default())).unwrap();
        }
        let workers = scheduler.pool.workers_snapshot();
        scheduler.end_service();

        assert!(scheduler.is_shutting_down());
        assert!(workers.iter().all(|w| w.is_cancelled()));
        assert!(scheduler.wait_for_workers(TIMEOUT));
    }

    #[test]
    fn drop_stops_workers() {
        let scheduler: Scheduler<MockTask> = Scheduler::new(config(2)).unwrap();
        let task = Arc::new(MockTask::default());
        scheduler.add(Arc::clone(&task)).unwrap();
        let pool = Arc::clone(&scheduler.pool);

        drop(scheduler);

        assert!(pool.is_shutting_down());
        assert!(wait_until(|| pool.read_workers().is_empty()));
        let steps = task.step_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(task.step_count(), steps, "no steps after the worker exits");
    }
}
