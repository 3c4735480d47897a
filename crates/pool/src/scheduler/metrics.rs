use std::time::Duration;

use chrono::{DateTime, Utc};
use microtask_core::PlacementMode;
use serde::Serialize;
use uuid::Uuid;

/// Point-in-time view of the pool. Best effort: figures are read without
/// stopping the workers, so they can disagree with each other slightly.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    pub max_workers: usize,
    pub placement: PlacementMode,
    pub shutting_down: bool,
    /// Tasks accepted by `add`.
    pub tasks_admitted: u64,
    /// Finished tasks dropped from an active list.
    pub tasks_completed: u64,
    /// Task steps that panicked and were isolated.
    pub task_panics: u64,
    pub workers_spawned: u64,
    /// Workers that exited after their idle period.
    pub workers_retired: u64,
    /// Live workers in pool order.
    pub workers: Vec<WorkerMetrics>,
}

/// Per-worker figures.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerMetrics {
    pub id: Uuid,
    pub active: usize,
    pub pending: usize,
    /// Duration of the last full cycle (dynamic placement only, zero otherwise).
    pub last_cycle: Duration,
    /// Consecutive empty cycles so far.
    pub idle_ticks: u64,
    pub cycles: u64,
    pub started_at: DateTime<Utc>,
}

impl SchedulerMetrics {
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn total_active(&self) -> usize {
        self.workers.iter().map(|w| w.active).sum()
    }

    pub fn total_pending(&self) -> usize {
        self.workers.iter().map(|w| w.pending).sum()
    }
}
