//! Background task store
//!
//! Canonical source of truth for task state: status transitions, the
//! bounded live-output log, final results, and eviction of old terminal
//! tasks. All operations are guarded behind one lock; the store never
//! blocks on anything but that lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TaskStoreConfig;
use crate::events::{OutputChunk, RunResult};

/// Reason recorded on tasks finalised by service shutdown.
pub const SHUTDOWN_REASON: &str = "Process shutting down";

/// Task lifecycle status. Transitions form a DAG:
/// `pending -> running -> (completed | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone)]
struct TaskRecord {
    id: u64,
    status: TaskStatus,
    source: String,
    language: String,
    working_directory: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    result: Option<RunResult>,
    output_log: VecDeque<OutputChunk>,
    output_bytes: usize,
}

/// Read-only snapshot of a task, as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: u64,
    pub status: TaskStatus,
    pub source: String,
    pub language: String,
    pub working_directory: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Wall time so far for running tasks, total wall time for terminal ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
}

struct StoreInner {
    tasks: HashMap<u64, TaskRecord>,
    next_id: u64,
}

/// Thread-safe task store with a periodic eviction sweep.
pub struct TaskStore {
    config: TaskStoreConfig,
    inner: Arc<Mutex<StoreInner>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TaskStore {
    pub fn new(config: TaskStoreConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(StoreInner {
                tasks: HashMap::new(),
                next_id: 0,
            })),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TaskStoreConfig::default())
    }

    /// Start the background eviction sweep.
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let config = self.config.clone();
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            ticker.tick().await; // immediate first tick, nothing to sweep yet
            loop {
                ticker.tick().await;
                let mut inner = inner.lock().await;
                sweep(&mut inner, &config);
            }
        }));
        debug!("task store eviction sweep started");
    }

    /// Allocate a new id and insert a pending record.
    pub async fn create_task(&self, source: &str, language: &str, working_directory: &str) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;

        inner.tasks.insert(
            id,
            TaskRecord {
                id,
                status: TaskStatus::Pending,
                source: source.to_string(),
                language: language.to_string(),
                working_directory: working_directory.to_string(),
                created_at: Utc::now().timestamp_millis(),
                started_at: None,
                completed_at: None,
                result: None,
                output_log: VecDeque::new(),
                output_bytes: 0,
            },
        );

        debug!(task_id = id, language, "task created");
        id
    }

    /// Mark a pending task as running. No-op for any other state, so the
    /// promotion path and the dispatch path can both call it.
    pub async fn start_task(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now().timestamp_millis());
        debug!(task_id = id, "task running");
        true
    }

    /// Record the final result of a task that ran to completion.
    pub async fn complete_task(&self, id: u64, mut result: RunResult) {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            debug!(task_id = id, "complete for unknown task ignored");
            return;
        };
        if task.status.is_terminal() {
            debug!(task_id = id, "task already terminal, completion ignored");
            return;
        }

        let now = Utc::now().timestamp_millis();
        if let Some(started) = task.started_at {
            result.execution_time_ms = now.saturating_sub(started).max(0) as u64;
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.result = Some(result);
        debug!(task_id = id, "task completed");
    }

    /// Finalise a task as failed with a short reason.
    pub async fn fail_task(&self, id: u64, reason: &str) {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            debug!(task_id = id, "fail for unknown task ignored");
            return;
        };
        if task.status.is_terminal() {
            debug!(task_id = id, "task already terminal, failure ignored");
            return;
        }

        let now = Utc::now().timestamp_millis();
        let execution_time_ms = task
            .started_at
            .map(|started| now.saturating_sub(started).max(0) as u64)
            .unwrap_or(0);

        task.status = TaskStatus::Failed;
        task.completed_at = Some(now);
        task.result = Some(RunResult {
            success: false,
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
            execution_time_ms,
            error: Some(reason.to_string()),
            timed_out: false,
        });
        warn!(task_id = id, reason, "task failed");
    }

    /// Append a live output chunk, enforcing the per-task byte bound by
    /// discarding the oldest chunks. Silently dropped once terminal.
    pub async fn append_output(&self, id: u64, chunk: OutputChunk) {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return;
        };
        if task.status.is_terminal() {
            return;
        }

        task.output_bytes += chunk.data.len();
        task.output_log.push_back(chunk);

        if task.output_bytes > self.config.max_output_bytes {
            let target = self.config.max_output_bytes / 2;
            while task.output_bytes > target {
                let Some(oldest) = task.output_log.pop_front() else {
                    break;
                };
                task.output_bytes -= oldest.data.len();
            }
        }
    }

    /// Atomically take all buffered output chunks, leaving the log empty.
    pub async fn read_and_clear_output(&self, id: u64) -> Vec<OutputChunk> {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Vec::new();
        };
        task.output_bytes = 0;
        task.output_log.drain(..).collect()
    }

    pub async fn get_task(&self, id: u64) -> Option<TaskSnapshot> {
        let inner = self.inner.lock().await;
        inner.tasks.get(&id).map(snapshot)
    }

    pub async fn delete_task(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        inner.tasks.remove(&id).is_some()
    }

    pub async fn task_count(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    /// Stop the sweep and finalise every non-terminal task.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }

        let pending: Vec<u64> = {
            let inner = self.inner.lock().await;
            inner
                .tasks
                .values()
                .filter(|t| !t.status.is_terminal())
                .map(|t| t.id)
                .collect()
        };
        for id in pending {
            self.fail_task(id, SHUTDOWN_REASON).await;
        }
        info!("task store shut down");
    }

    #[cfg(test)]
    async fn sweep_now(&self) {
        let mut inner = self.inner.lock().await;
        sweep(&mut inner, &self.config);
    }
}

fn snapshot(task: &TaskRecord) -> TaskSnapshot {
    let runtime_ms = task.started_at.map(|started| {
        let end = task
            .completed_at
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        end.saturating_sub(started)
    });

    TaskSnapshot {
        id: task.id,
        status: task.status,
        source: task.source.clone(),
        language: task.language.clone(),
        working_directory: task.working_directory.clone(),
        created_at: task.created_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
        runtime_ms,
        result: task.result.clone(),
    }
}

/// Evict old terminal tasks by age, then by count. Non-terminal tasks are
/// never evicted.
fn sweep(inner: &mut StoreInner, config: &TaskStoreConfig) {
    let now = Utc::now().timestamp_millis();
    let max_age_ms = config.max_task_age.as_millis() as i64;

    let expired: Vec<u64> = inner
        .tasks
        .values()
        .filter(|t| {
            t.status.is_terminal()
                && t.completed_at
                    .map(|done| now - done > max_age_ms)
                    .unwrap_or(false)
        })
        .map(|t| t.id)
        .collect();
    for id in &expired {
        inner.tasks.remove(id);
    }

    if inner.tasks.len() > config.max_tasks {
        let mut terminal: Vec<(i64, u64)> = inner
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| (t.completed_at.unwrap_or(0), t.id))
            .collect();
        terminal.sort_unstable();

        let excess = inner.tasks.len() - config.max_tasks;
        for (_, id) in terminal.into_iter().take(excess) {
            inner.tasks.remove(&id);
        }
    }

    if !expired.is_empty() {
        debug!(evicted = expired.len(), "eviction sweep removed aged tasks");
    }
}
