use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A unit of work the scheduler advances one step per worker cycle.
///
/// Tasks are shared as `Arc<T>`: the caller keeps a handle (and may
/// force-finish the task at any time) while exactly one worker steps it.
/// All methods take `&self`, so implementations own their interior
/// mutability.
pub trait MicroTask: Send + Sync {
    /// Run a single step of the task's logic.
    ///
    /// Must not loop or block indefinitely: the worker calls this once per
    /// cycle until [`is_finished`](MicroTask::is_finished) returns true, and
    /// nothing preempts a step that never returns.
    fn step(&self);

    /// Whether the task has completed. Finished tasks are never stepped again.
    fn is_finished(&self) -> bool;

    /// Set the finished flag. The scheduler uses this to force-finish tasks.
    fn set_finished(&self, finished: bool);
}

/// Atomic finished flag for task implementations.
#[derive(Debug, Default)]
pub struct FinishFlag(AtomicBool);

impl FinishFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, finished: bool) {
        self.0.store(finished, Ordering::Release);
    }
}

/// Result of one [`FnTask`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep stepping on the next cycle.
    Continue,
    /// The task is done; it will be dropped by its worker.
    Done,
}

/// Adapts a closure over caller-owned state into a [`MicroTask`].
///
/// ```
/// use microtask_core::{FnTask, MicroTask, StepOutcome};
///
/// let task = FnTask::new(0u32, |n| {
///     *n += 1;
///     if *n == 3 { StepOutcome::Done } else { StepOutcome::Continue }
/// });
/// task.step();
/// task.step();
/// task.step();
/// assert!(task.is_finished());
/// assert_eq!(task.with_state(|n| *n), 3);
/// ```
pub struct FnTask<S, F> {
    inner: Mutex<FnTaskInner<S, F>>,
    finished: FinishFlag,
}

struct FnTaskInner<S, F> {
    state: S,
    step_fn: F,
}

impl<S, F> FnTask<S, F>
where
    F: FnMut(&mut S) -> StepOutcome,
{
    pub fn new(state: S, step_fn: F) -> Self {
        Self {
            inner: Mutex::new(FnTaskInner { state, step_fn }),
            finished: FinishFlag::new(),
        }
    }

    /// Read the task state. Blocks while a step is in progress.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&inner.state)
    }

    /// Consume the task and return its state.
    pub fn into_state(self) -> S {
        self.inner
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .state
    }
}

impl<S, F> MicroTask for FnTask<S, F>
where
    S: Send,
    F: FnMut(&mut S) -> StepOutcome + Send,
{
    fn step(&self) {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => {
                // A previous step panicked mid-update; the state can't be trusted.
                self.finished.set(true);
                return;
            }
        };
        let FnTaskInner { state, step_fn } = &mut *guard;
        if step_fn(state) == StepOutcome::Done {
            self.finished.set(true);
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.get()
    }

    fn set_finished(&self, finished: bool) {
        self.finished.set(finished);
    }
}
