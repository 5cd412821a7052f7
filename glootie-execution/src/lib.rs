//! Glootie Execution Engine
//!
//! This crate provides the core execution functionality for glootie: an
//! isolated child-process runner for several language runtimes, a bounded
//! worker pool with foreground-to-background promotion, and the task store
//! that tracks backgrounded jobs with bounded live-output buffering.

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod language;
pub mod pool;
pub mod runner;
pub mod task_store;

// Re-export main types
pub use config::{EngineConfig, PoolConfig, RunnerConfig, TaskStoreConfig};
pub use error::{ExecutionError, PoolError};
pub use events::{OutputChunk, OutputStream, RunResult, WorkerEvent};
pub use executor::{ExecuteReply, ExecuteRequest, ExecutionEngine};
pub use pool::{ExecuteOutcome, WorkerPool};
pub use runner::{purge_stale_scratch, OutputSink, RunRequest, ScriptRunner};
pub use task_store::{TaskSnapshot, TaskStatus, TaskStore};
