//! End-to-end flows through the engine: facade -> pool -> runner -> store.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use glootie_execution::{
    EngineConfig, ExecuteReply, ExecuteRequest, ExecutionEngine, PoolConfig, TaskStatus, TaskStore,
    TaskStoreConfig, WorkerPool,
};

async fn engine_with_foreground(
    foreground: Duration,
) -> (Arc<ExecutionEngine>, Arc<TaskStore>, Arc<WorkerPool>) {
    let store = Arc::new(TaskStore::new(TaskStoreConfig::default()));
    store.start().await;
    let pool = Arc::new(WorkerPool::new(
        PoolConfig {
            worker_count: 2,
            hard_ceiling: Duration::from_secs(120),
            ..Default::default()
        },
        store.clone(),
    ));
    pool.start().await;
    let engine = Arc::new(ExecutionEngine::new(
        pool.clone(),
        store.clone(),
        EngineConfig {
            foreground_ceiling: foreground,
        },
    ));
    (engine, store, pool)
}

fn shell(commands: &str) -> ExecuteRequest {
    ExecuteRequest {
        code: commands.to_string(),
        working_directory: std::env::temp_dir().to_string_lossy().into_owned(),
        language: None,
        run_in_background: false,
        shell: true,
    }
}

async fn wait_terminal(store: &TaskStore, id: u64) -> TaskStatus {
    for _ in 0..200 {
        if let Some(snap) = store.get_task(id).await {
            if snap.status.is_terminal() {
                return snap.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {id} never finished");
}

#[tokio::test]
async fn short_command_completes_synchronously() {
    let (engine, store, _pool) = engine_with_foreground(Duration::from_secs(10)).await;

    let reply = engine.execute(shell("echo a && echo b")).await.unwrap();
    let result = match reply {
        ExecuteReply::Completed { result } => result,
        other => panic!("expected sync result, got {other:?}"),
    };
    assert!(result.success);
    assert_eq!(result.stdout, "a\nb\n");

    let text = ExecutionEngine::format_result(&result);
    assert!(text.contains("[STDOUT]\na\nb\n"));
    assert!(text.contains("Exit code: 0"));

    // the synchronous path leaves nothing behind
    assert_eq!(store.task_count().await, 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn slow_command_is_promoted_and_finishes_in_the_store() {
    let (engine, store, _pool) = engine_with_foreground(Duration::from_millis(150)).await;

    let reply = engine
        .execute(shell("sleep 1; echo done"))
        .await
        .unwrap();
    let task_id = match reply {
        ExecuteReply::Backgrounded { task_id } => task_id,
        other => panic!("expected promotion, got {other:?}"),
    };

    let message = ExecutionEngine::backgrounded_message(task_id);
    assert!(message.contains(&format!("task_{task_id}")));

    assert_eq!(wait_terminal(&store, task_id).await, TaskStatus::Completed);
    let snap = engine.task_status(task_id).await.unwrap();
    let result = snap.result.unwrap();
    assert!(result.success);
    assert_eq!(result.stdout, "done\n");

    assert!(engine.close_task(task_id).await);
    assert!(engine.task_status(task_id).await.is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn live_output_can_be_drained_while_running() {
    let (engine, _store, _pool) = engine_with_foreground(Duration::from_millis(100)).await;

    let reply = engine
        .execute(shell("echo tick; sleep 2; echo tock"))
        .await
        .unwrap();
    let task_id = match reply {
        ExecuteReply::Backgrounded { task_id } => task_id,
        other => panic!("expected promotion, got {other:?}"),
    };

    let mut drained = Vec::new();
    for _ in 0..40 {
        drained.extend(engine.read_task_output(task_id).await);
        if !drained.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(drained[0].data, "tick\n");

    // a second drain right away returns nothing new
    assert!(engine.read_task_output(task_id).await.is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn nonzero_exit_surfaces_the_exit_code() {
    let (engine, _store, _pool) = engine_with_foreground(Duration::from_secs(10)).await;

    let reply = engine.execute(shell("exit 7")).await.unwrap();
    match reply {
        ExecuteReply::Completed { result } => {
            assert!(!result.success);
            assert_eq!(result.exit_code, 7);
        }
        other => panic!("expected sync result, got {other:?}"),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn shutdown_finalises_background_tasks() {
    let (engine, store, _pool) = engine_with_foreground(Duration::from_secs(10)).await;

    let reply = engine
        .execute(ExecuteRequest {
            run_in_background: true,
            ..shell("sleep 60")
        })
        .await
        .unwrap();
    let task_id = match reply {
        ExecuteReply::Backgrounded { task_id } => task_id,
        other => panic!("expected background handle, got {other:?}"),
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    engine.shutdown().await;

    let snap = store.get_task(task_id).await.unwrap();
    assert_eq!(snap.status, TaskStatus::Failed);
    assert_eq!(
        snap.result.unwrap().error.as_deref(),
        Some("Process shutting down")
    );
}
