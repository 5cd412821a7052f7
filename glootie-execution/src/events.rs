//! Typed messages between worker slots and the pool, plus their payloads

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which child stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One coalesced chunk of live output captured while a task is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    /// Capture timestamp, epoch milliseconds.
    #[serde(rename = "t")]
    pub timestamp_ms: i64,

    #[serde(rename = "s")]
    pub stream: OutputStream,

    #[serde(rename = "d")]
    pub data: String,
}

impl OutputChunk {
    /// Create a chunk stamped with the current time.
    pub fn now(stream: OutputStream, data: String) -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            stream,
            data,
        }
    }
}

/// Final result of running one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,

    /// Short reason string, present on failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether the runner's deadline expired and the child was killed.
    /// Internal routing detail, not part of the result wire shape.
    #[serde(skip)]
    pub timed_out: bool,
}

impl RunResult {
    /// Result for a child that ran to completion with the given exit code.
    pub fn completed(exit_code: i32, stdout: String, stderr: String, execution_time_ms: u64) -> Self {
        Self {
            success: exit_code == 0,
            exit_code,
            stdout,
            stderr,
            execution_time_ms,
            error: None,
            timed_out: false,
        }
    }

    /// Result for an internal failure: spawn error, staging error, or an
    /// unsupported runtime tag. Never carries child output.
    pub fn internal_failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
            execution_time_ms: 0,
            error: Some(reason.into()),
            timed_out: false,
        }
    }
}

/// Messages sent from worker slots to the pool's event loop.
///
/// Dispatch is the queue send itself; everything coming back is one of
/// these. The event loop matches exhaustively and drops events whose job id
/// is no longer active.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The runner resolved with a final result (success or not).
    JobCompleted { job_id: u64, result: RunResult },

    /// The worker itself died while driving the job.
    JobFailed { job_id: u64, reason: String },

    /// A coalesced chunk of live child output.
    LiveOutput { job_id: u64, chunk: OutputChunk },
}
