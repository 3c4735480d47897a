pub mod config;
pub mod error;
pub mod task;

pub use config::{PanicPolicy, PlacementMode, SchedulerConfig};
pub use error::*;
pub use task::{FinishFlag, FnTask, MicroTask, StepOutcome};
