pub mod scheduler;

pub use microtask_core::{
    FinishFlag, FnTask, MicroTask, PanicPolicy, PlacementMode, SchedulerConfig, SchedulerError,
    StepOutcome,
};
pub use scheduler::{Scheduler, SchedulerMetrics, WorkerLoad, WorkerMetrics};
