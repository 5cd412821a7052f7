//! Configuration for the execution engine components

use std::time::Duration;

/// Scratch directory prefix used for per-job temporaries.
pub const SCRATCH_PREFIX: &str = "glootie_";

/// Configuration for the child-process runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Cap on each in-memory stream accumulator; the oldest half is
    /// discarded on overflow.
    pub max_stream_buffer: usize,
    /// Coalescing window for live output chunks.
    pub flush_window: Duration,
    /// Grace period between the termination signal and the hard kill.
    pub term_grace: Duration,
    /// Prefix for per-job scratch directories in the OS temp root.
    pub scratch_prefix: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_stream_buffer: 10 * 1024 * 1024, // 10 MiB
            flush_window: Duration::from_millis(200),
            term_grace: Duration::from_secs(5),
            scratch_prefix: SCRATCH_PREFIX.to_string(),
        }
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Fixed number of worker slots. The pool never grows.
    pub worker_count: usize,
    /// Maximum number of jobs waiting for a free slot.
    pub max_queue: usize,
    /// Hard ceiling on any single job; the runner kills the child at this
    /// bound regardless of promotion state.
    pub hard_ceiling: Duration,
    /// Interval between health-check sweeps.
    pub health_check_interval: Duration,
    /// A running job older than this is considered stuck and killed.
    pub max_job_age: Duration,
    /// Runner configuration shared by all slots.
    pub runner: RunnerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue: 100,
            hard_ceiling: Duration::from_secs(24 * 60 * 60),
            health_check_interval: Duration::from_secs(30),
            max_job_age: Duration::from_secs(60 * 60),
            runner: RunnerConfig::default(),
        }
    }
}

/// Configuration for the task store
#[derive(Debug, Clone)]
pub struct TaskStoreConfig {
    /// Hard cap on tracked tasks; terminal tasks are evicted oldest-first
    /// beyond it.
    pub max_tasks: usize,
    /// Terminal tasks older than this are evicted by the sweep.
    pub max_task_age: Duration,
    /// Cap on buffered live output per task; trimmed to half on overflow.
    pub max_output_bytes: usize,
    /// Interval between eviction sweeps.
    pub sweep_interval: Duration,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            max_tasks: 1000,
            max_task_age: Duration::from_secs(30 * 60),
            max_output_bytes: 100 * 1024, // 100 KiB
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration for the executor facade
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long `execute` waits for a synchronous result before promoting
    /// the job to a background task.
    pub foreground_ceiling: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            foreground_ceiling: Duration::from_secs(15),
        }
    }
}
