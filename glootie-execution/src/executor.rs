//! Executor facade
//!
//! The public surface the request dispatcher consumes: input validation,
//! language normalisation, the foreground/background execution paths, task
//! queries, and the output formatting policy.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::events::{OutputChunk, RunResult};
use crate::language::normalize_language;
use crate::pool::{ExecuteOutcome, WorkerPool};
use crate::task_store::{TaskSnapshot, TaskStore};

/// One execution request as received from the tool surface.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub code: String,
    pub working_directory: String,
    pub language: Option<String>,
    pub run_in_background: bool,
    /// Shell requests force the platform shell regardless of `language`.
    pub shell: bool,
}

/// What the caller gets back from [`ExecutionEngine::execute`].
#[derive(Debug)]
pub enum ExecuteReply {
    /// The child finished inside the foreground ceiling. The task record is
    /// already deleted; the synchronous path never surfaces an id.
    Completed { result: RunResult },

    /// The job continues as a tracked background task.
    Backgrounded { task_id: u64 },
}

/// Facade over the worker pool and the task store.
pub struct ExecutionEngine {
    pool: Arc<WorkerPool>,
    store: Arc<TaskStore>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(pool: Arc<WorkerPool>, store: Arc<TaskStore>, config: EngineConfig) -> Self {
        Self {
            pool,
            store,
            config,
        }
    }

    /// Validate, normalise, create the task record, and dispatch.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteReply, ExecutionError> {
        if request.code.trim().is_empty() {
            return Err(ExecutionError::InvalidInput(
                "code must not be empty".to_string(),
            ));
        }
        if request.working_directory.trim().is_empty() {
            return Err(ExecutionError::InvalidInput(
                "workingDirectory must not be empty".to_string(),
            ));
        }

        let language = normalize_language(request.language.as_deref(), request.shell);
        let task_id = self
            .store
            .create_task(&request.code, &language, &request.working_directory)
            .await;
        let working_dir = PathBuf::from(&request.working_directory);

        debug!(task_id, %language, background = request.run_in_background, "executing");

        let foreground = if request.run_in_background {
            // explicitly backgrounded jobs are running from the caller's
            // point of view the moment they are accepted
            self.store.start_task(task_id).await;
            None
        } else {
            Some(self.config.foreground_ceiling)
        };

        let dispatched = self
            .pool
            .execute(task_id, request.code, language, working_dir, foreground)
            .await;

        match dispatched {
            Ok(ExecuteOutcome::Completed(result)) => {
                self.store.delete_task(task_id).await;
                Ok(ExecuteReply::Completed { result })
            }
            Ok(ExecuteOutcome::Backgrounded { task_id }) => {
                Ok(ExecuteReply::Backgrounded { task_id })
            }
            Err(e) => {
                // fail-fast structural errors never leak a pending record
                self.store.delete_task(task_id).await;
                Err(e.into())
            }
        }
    }

    pub async fn task_status(&self, id: u64) -> Option<TaskSnapshot> {
        self.store.get_task(id).await
    }

    /// Drain the task's buffered live output.
    pub async fn read_task_output(&self, id: u64) -> Vec<OutputChunk> {
        self.store.read_and_clear_output(id).await
    }

    /// Release a finished (or unwanted) background task.
    pub async fn close_task(&self, id: u64) -> bool {
        self.store.delete_task(id).await
    }

    /// Tear down the pool, then the store. In-flight work is finalised as
    /// failed and active children are killed.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.store.shutdown().await;
    }

    /// Render a final result: context header, then the non-empty stream
    /// sections.
    pub fn format_result(result: &RunResult) -> String {
        let mut text = format!(
            "Exit code: {} | Time: {}ms | stdout: {} bytes | stderr: {} bytes\n",
            result.exit_code,
            result.execution_time_ms,
            result.stdout.len(),
            result.stderr.len()
        );

        if let Some(error) = &result.error {
            text.push_str(&format!("Error: {error}\n"));
        }
        if !result.stdout.is_empty() {
            text.push_str("\n[STDOUT]\n");
            text.push_str(&result.stdout);
        }
        if !result.stderr.is_empty() {
            text.push_str("\n[STDERR]\n");
            text.push_str(&result.stderr);
        }
        if result.stdout.is_empty() && result.stderr.is_empty() {
            text.push_str("\n(no output)");
        }

        text
    }

    /// The task handle message returned when a job is promoted or
    /// explicitly backgrounded.
    pub fn backgrounded_message(task_id: u64) -> String {
        format!(
            "Process backgrounded (ID: task_{task_id}). Check status with process_status tool or resource task://{task_id}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, TaskStoreConfig};
    use crate::task_store::TaskStatus;
    use std::time::Duration;

    async fn engine() -> (Arc<ExecutionEngine>, Arc<TaskStore>) {
        let store = Arc::new(TaskStore::new(TaskStoreConfig::default()));
        let pool = Arc::new(WorkerPool::new(
            PoolConfig {
                worker_count: 2,
                hard_ceiling: Duration::from_secs(60),
                ..Default::default()
            },
            store.clone(),
        ));
        pool.start().await;
        let engine = Arc::new(ExecutionEngine::new(
            pool,
            store.clone(),
            EngineConfig::default(),
        ));
        (engine, store)
    }

    fn shell_request(commands: &str) -> ExecuteRequest {
        ExecuteRequest {
            code: commands.to_string(),
            working_directory: std::env::temp_dir().to_string_lossy().into_owned(),
            language: None,
            run_in_background: false,
            shell: true,
        }
    }

    #[tokio::test]
    async fn empty_code_is_rejected_before_task_creation() {
        let (engine, store) = engine().await;
        let err = engine
            .execute(ExecuteRequest {
                code: "   ".to_string(),
                working_directory: "/tmp".to_string(),
                language: None,
                run_in_background: false,
                shell: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidInput(_)));
        assert_eq!(store.task_count().await, 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn empty_working_directory_is_rejected() {
        let (engine, _store) = engine().await;
        let err = engine
            .execute(ExecuteRequest {
                code: "echo hi".to_string(),
                working_directory: String::new(),
                language: None,
                run_in_background: false,
                shell: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidInput(_)));
        engine.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn synchronous_path_deletes_the_task_record() {
        let (engine, store) = engine().await;

        let reply = engine.execute(shell_request("echo hi")).await.unwrap();
        match reply {
            ExecuteReply::Completed { result } => {
                assert!(result.success);
                assert_eq!(result.stdout, "hi\n");
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(store.task_count().await, 0);
        engine.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_path_returns_a_running_task() {
        let (engine, store) = engine().await;

        let reply = engine
            .execute(ExecuteRequest {
                run_in_background: true,
                ..shell_request("sleep 0.3; echo bg")
            })
            .await
            .unwrap();

        let task_id = match reply {
            ExecuteReply::Backgrounded { task_id } => task_id,
            other => panic!("expected background handle, got {other:?}"),
        };
        assert_eq!(
            store.get_task(task_id).await.unwrap().status,
            TaskStatus::Running
        );

        for _ in 0..100 {
            if store.get_task(task_id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let snap = store.get_task(task_id).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.result.unwrap().stdout, "bg\n");

        assert!(engine.close_task(task_id).await);
        assert!(engine.task_status(task_id).await.is_none());
        engine.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unknown_language_is_a_result_not_an_error() {
        let (engine, _store) = engine().await;

        let reply = engine
            .execute(ExecuteRequest {
                code: "whatever".to_string(),
                working_directory: "/tmp".to_string(),
                language: Some("cobol".to_string()),
                run_in_background: false,
                shell: false,
            })
            .await
            .unwrap();

        match reply {
            ExecuteReply::Completed { result } => {
                assert!(!result.success);
                assert_eq!(result.error.as_deref(), Some("Unsupported runtime: cobol"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        engine.shutdown().await;
    }

    #[test]
    fn formatting_contains_the_stream_sections_and_header() {
        let result = RunResult::completed(0, "hi\n".to_string(), String::new(), 12);
        let text = ExecutionEngine::format_result(&result);
        assert!(text.contains("Exit code: 0"));
        assert!(text.contains("Time: 12ms"));
        assert!(text.contains("[STDOUT]\nhi\n"));
        assert!(!text.contains("[STDERR]"));

        let noisy = RunResult::completed(3, "out\n".to_string(), "oops\n".to_string(), 4);
        let text = ExecutionEngine::format_result(&noisy);
        assert!(text.contains("Exit code: 3"));
        assert!(text.contains("[STDOUT]\nout\n"));
        assert!(text.contains("[STDERR]\noops\n"));

        let silent = RunResult::completed(0, String::new(), String::new(), 1);
        assert!(ExecutionEngine::format_result(&silent).contains("(no output)"));
    }

    #[test]
    fn backgrounded_message_format() {
        assert_eq!(
            ExecutionEngine::backgrounded_message(42),
            "Process backgrounded (ID: task_42). Check status with process_status tool or resource task://42"
        );
    }
}
