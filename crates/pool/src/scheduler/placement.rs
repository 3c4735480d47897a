use microtask_core::PlacementMode;

/// Load figures of one worker, as seen by the placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerLoad {
    /// Tasks in the worker's active list.
    pub active: usize,
    /// Tasks waiting in the worker's pending queue.
    pub pending: usize,
    /// Duration of the worker's last full cycle, in nanoseconds. Zero unless
    /// the pool runs in dynamic mode.
    pub last_cycle_nanos: u64,
}

impl WorkerLoad {
    /// Tasks the worker is responsible for: `active + pending`.
    pub fn queued(&self) -> usize {
        self.active + self.pending
    }

    /// Estimated cycle time after accepting one more task:
    /// `run_time + run_time * pending / (active + 1)`.
    pub fn projected_cost(&self) -> u128 {
        let run_time = u128::from(self.last_cycle_nanos);
        run_time + (run_time * self.pending as u128) / (self.active as u128 + 1)
    }
}

/// Pick the index of the worker that should receive the next task.
///
/// Ties go to the first worker in pool order. Returns `None` for an empty pool.
pub fn select_worker<I>(mode: PlacementMode, loads: I) -> Option<usize>
where
    I: IntoIterator<Item = WorkerLoad>,
{
    let indexed = loads.into_iter().enumerate();
    // `min_by_key` keeps the first of several equal minima.
    let best = match mode {
        PlacementMode::Static => indexed.min_by_key(|(_, load)| load.queued()),
        PlacementMode::Dynamic => indexed.min_by_key(|(_, load)| load.projected_cost()),
    };
    best.map(|(idx, _)| idx)
}
