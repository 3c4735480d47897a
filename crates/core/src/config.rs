use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{self, SchedulerError};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Enums ─────────────────────────────────────────────────────

/// How a task is placed once the pool is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// Fewest `active + pending` tasks wins.
    #[default]
    Static,
    /// Smallest projected cycle time after accepting one more task wins.
    Dynamic,
}

impl PlacementMode {
    pub fn is_dynamic(self) -> bool {
        matches!(self, PlacementMode::Dynamic)
    }
}

impl fmt::Display for PlacementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementMode::Static => f.write_str("static"),
            PlacementMode::Dynamic => f.write_str("dynamic"),
        }
    }
}

impl FromStr for PlacementMode {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" | "count" => Ok(PlacementMode::Static),
            "dynamic" | "runtime" => Ok(PlacementMode::Dynamic),
            other => Err(SchedulerError::Config(format!(
                "unknown placement mode '{other}' (expected 'static' or 'dynamic')"
            ))),
        }
    }
}

/// What a worker does when a task's step panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Catch the panic, force-finish the task, keep cycling.
    #[default]
    Isolate,
    /// Let the panic end the worker thread. Its remaining tasks are abandoned.
    AbortWorker,
}

impl FromStr for PanicPolicy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(PanicPolicy::Isolate),
            "abort_worker" | "abort" => Ok(PanicPolicy::AbortWorker),
            other => Err(SchedulerError::Config(format!(
                "unknown panic policy '{other}' (expected 'isolate' or 'abort_worker')"
            ))),
        }
    }
}

// ── SchedulerConfig ───────────────────────────────────────────

/// Scheduler configuration, fixed at construction.
///
/// Parsed from TOML with `MICROTASK_*` environment variable overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on live workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Load-balancing heuristic used once the pool is full.
    #[serde(default)]
    pub placement: PlacementMode,
    /// Consecutive empty cycles before a worker retires.
    #[serde(default = "default_keep_alive_ticks")]
    pub keep_alive_ticks: u64,
    #[serde(default)]
    pub panic_policy: PanicPolicy,
    /// Yield the OS thread on cycles with nothing to run.
    #[serde(default = "default_idle_yield")]
    pub idle_yield: bool,
    /// Prefix for worker thread names.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_max_workers() -> usize { 1 }
fn default_keep_alive_ticks() -> u64 { 100_000 }
fn default_idle_yield() -> bool { true }
fn default_thread_name_prefix() -> String { "microtask-worker".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            placement: PlacementMode::default(),
            keep_alive_ticks: default_keep_alive_ticks(),
            panic_policy: PanicPolicy::default(),
            idle_yield: default_idle_yield(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl SchedulerConfig {
    /// Single worker, static placement.
    pub fn single() -> Self {
        Self::default()
    }

    /// A pool of up to `max_workers` using the given placement mode.
    pub fn pooled(max_workers: usize, placement: PlacementMode) -> Self {
        Self {
            max_workers,
            placement,
            ..Self::default()
        }
    }

    pub fn with_keep_alive_ticks(mut self, ticks: u64) -> Self {
        self.keep_alive_ticks = ticks;
        self
    }

    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    pub fn with_idle_yield(mut self, idle_yield: bool) -> Self {
        self.idle_yield = idle_yield;
        self
    }

    // ── Loading ───────────────────────────────────────────────

    /// Parse config from a TOML string, then apply env overrides.
    ///
    /// Accepts either a `[scheduler]` section or the fields at top level.
    pub fn from_toml_str(toml_str: &str) -> error::Result<Self> {
        let mut table: toml::Table = toml_str.parse()?;
        let mut config: Self = match table.remove("scheduler") {
            Some(section) => section.try_into()?,
            None => table.try_into()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> error::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Defaults plus `MICROTASK_*` env overrides (call `load_dotenv()` first).
    pub fn from_env() -> error::Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok().filter(|v| !v.is_empty()));
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MICROTASK_MAX_WORKERS") {
            match v.parse() {
                Ok(n) => self.max_workers = n,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid MICROTASK_MAX_WORKERS"),
            }
        }
        if let Some(v) = lookup("MICROTASK_PLACEMENT") {
            match v.parse() {
                Ok(mode) => self.placement = mode,
                Err(e) => tracing::warn!(error = %e, "ignoring MICROTASK_PLACEMENT"),
            }
        }
        if let Some(v) = lookup("MICROTASK_KEEP_ALIVE_TICKS") {
            match v.parse() {
                Ok(n) => self.keep_alive_ticks = n,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid MICROTASK_KEEP_ALIVE_TICKS"),
            }
        }
        if let Some(v) = lookup("MICROTASK_PANIC_POLICY") {
            match v.parse() {
                Ok(policy) => self.panic_policy = policy,
                Err(e) => tracing::warn!(error = %e, "ignoring MICROTASK_PANIC_POLICY"),
            }
        }
        if let Some(v) = lookup("MICROTASK_IDLE_YIELD") {
            match v.parse() {
                Ok(b) => self.idle_yield = b,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid MICROTASK_IDLE_YIELD"),
            }
        }
    }

    // ── Validation ────────────────────────────────────────────

    pub fn validate(&self) -> error::Result<()> {
        if self.max_workers == 0 {
            return Err(SchedulerError::Config("max_workers must be at least 1".into()));
        }
        if self.keep_alive_ticks == 0 {
            return Err(SchedulerError::Config(
                "keep_alive_ticks must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config:");
        tracing::info!("  max_workers:       {}", self.max_workers);
        tracing::info!("  placement:         {}", self.placement);
        tracing::info!("  keep_alive_ticks:  {}", self.keep_alive_ticks);
        tracing::info!("  panic_policy:      {:?}", self.panic_policy);
        tracing::info!("  idle_yield:        {}", self.idle_yield);
    }
}
