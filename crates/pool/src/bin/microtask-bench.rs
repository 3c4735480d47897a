//! microtask-bench -- drive a scheduler with Fibonacci micro-tasks.
//!
//! Admits `--tasks` tasks that each advance a Fibonacci sequence one term per
//! step and finish after `--steps` steps. Every `--slow-every`th task also
//! sleeps per step, which makes the difference between static and dynamic
//! placement visible in the final metrics.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use microtask_core::config::load_dotenv;
use microtask_pool::{FnTask, MicroTask, PlacementMode, Scheduler, SchedulerConfig, StepOutcome};

// ── CLI ─────────────────────────────────────────────────────────────

/// Micro-task scheduler benchmark.
#[derive(Parser, Debug)]
#[command(name = "microtask-bench", version, about)]
struct Cli {
    /// Path to a TOML config file (`[scheduler]` section or bare fields).
    #[arg(long, env = "MICROTASK_CONFIG")]
    config: Option<String>,

    /// Maximum worker threads (overrides config).
    #[arg(long)]
    workers: Option<usize>,

    /// Placement mode: static or dynamic (overrides config).
    #[arg(long)]
    placement: Option<PlacementMode>,

    /// Number of tasks to admit.
    #[arg(long, default_value_t = 10_000)]
    tasks: usize,

    /// Steps each task runs before finishing.
    #[arg(long, default_value_t = 3)]
    steps: u32,

    /// Make every Nth task slow (0 = none).
    #[arg(long, default_value_t = 0)]
    slow_every: usize,

    /// Per-step sleep of slow tasks, in microseconds.
    #[arg(long, default_value_t = 200)]
    slow_step_micros: u64,

    /// Give up waiting for tasks or workers after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

// ── Tasks ───────────────────────────────────────────────────────────

struct Fibonacci {
    alpha: u64,
    beta: u64,
    remaining: u32,
}

fn fibonacci_task(steps: u32, slow_step: Option<Duration>) -> Arc<dyn MicroTask> {
    let fib = Fibonacci {
        alpha: 1,
        beta: 0,
        remaining: steps,
    };
    Arc::new(FnTask::new(fib, move |f| {
        if let Some(delay) = slow_step {
            thread::sleep(delay);
        }
        let next = f.alpha.wrapping_add(f.beta);
        f.beta = f.alpha;
        f.alpha = next;
        f.remaining = f.remaining.saturating_sub(1);
        if f.remaining == 0 {
            StepOutcome::Done
        } else {
            StepOutcome::Continue
        }
    }))
}

// ── main ────────────────────────────────────────────────────────────

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn build_config(cli: &Cli) -> anyhow::Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => SchedulerConfig::from_env()?,
    };
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }
    if let Some(placement) = cli.placement {
        config.placement = placement;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    config.log_summary();

    let timeout = Duration::from_secs(cli.timeout_secs);
    let slow_step = Duration::from_micros(cli.slow_step_micros);
    let scheduler: Scheduler = Scheduler::new(config)?;

    let start = Instant::now();
    for i in 0..cli.tasks {
        let slow = cli.slow_every > 0 && i % cli.slow_every == 0;
        scheduler.add(fibonacci_task(cli.steps, slow.then_some(slow_step)))?;
    }
    info!(
        tasks = cli.tasks,
        workers = scheduler.worker_count(),
        elapsed_ms = elapsed_ms(start),
        "tasks admitted"
    );

    let mut last_report = Instant::now();
    loop {
        let metrics = scheduler.metrics();
        if scheduler.active_tasks().is_empty() && metrics.total_pending() == 0 {
            break;
        }
        if start.elapsed() > timeout {
            warn!(
                active = metrics.total_active(),
                pending = metrics.total_pending(),
                "timed out waiting for tasks"
            );
            break;
        }
        if last_report.elapsed() >= Duration::from_millis(500) {
            info!(
                active = metrics.total_active(),
                pending = metrics.total_pending(),
                completed = metrics.tasks_completed,
                "progress"
            );
            last_report = Instant::now();
        }
        thread::sleep(Duration::from_millis(5));
    }

    info!(
        elapsed_ms = elapsed_ms(start),
        "run complete"
    );
    println!("{}", serde_json::to_string_pretty(&scheduler.metrics())?);

    scheduler.end_service();
    if !scheduler.wait_for_workers(timeout) {
        warn!(
            workers = scheduler.worker_count(),
            "workers still running after timeout"
        );
    }

    info!("microtask-bench exited cleanly");
    Ok(())
}
