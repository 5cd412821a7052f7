//! End-to-end tool dispatch through the JSON-RPC handler.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use glootie_execution::{
    EngineConfig, ExecutionEngine, PoolConfig, TaskStore, TaskStoreConfig, WorkerPool,
};
use glootie_mcp::protocol::{JsonRpcRequest, ToolsCallResult, JSONRPC_VERSION};
use glootie_mcp::{GlootieToolRegistry, RequestHandler};

async fn handler_with_foreground(foreground: Duration) -> (RequestHandler, Arc<ExecutionEngine>) {
    let store = Arc::new(TaskStore::new(TaskStoreConfig::default()));
    store.start().await;
    let pool = Arc::new(WorkerPool::new(
        PoolConfig {
            worker_count: 2,
            ..Default::default()
        },
        store.clone(),
    ));
    pool.start().await;
    let engine = Arc::new(ExecutionEngine::new(
        pool,
        store,
        EngineConfig {
            foreground_ceiling: foreground,
        },
    ));
    let handler = RequestHandler::new(Arc::new(GlootieToolRegistry::new(engine.clone())));
    (handler, engine)
}

async fn call_tool(handler: &RequestHandler, name: &str, arguments: Value) -> ToolsCallResult {
    let request = JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method: "tools/call".to_string(),
        params: Some(json!({ "name": name, "arguments": arguments })),
        id: Some(json!(1)),
    };
    let response = handler.handle(request).await.expect("expected a response");
    serde_json::from_value(response.result.expect("expected a result")).unwrap()
}

fn text_of(result: &ToolsCallResult) -> String {
    let glootie_mcp::ToolContent::Text { text } = &result.content[0];
    text.clone()
}

fn tmp() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

#[tokio::test]
async fn bash_commands_round_trip() {
    let (handler, engine) = handler_with_foreground(Duration::from_secs(10)).await;

    let result = call_tool(
        &handler,
        "bash",
        json!({ "workingDirectory": tmp(), "commands": ["echo a", "echo b"] }),
    )
    .await;

    assert!(!result.is_error);
    let text = text_of(&result);
    assert!(text.contains("a\nb\n"));
    assert!(text.contains("Exit code: 0"));

    engine.shutdown().await;
}

#[tokio::test]
async fn slow_job_is_promoted_and_observable_through_process_status() {
    let (handler, engine) = handler_with_foreground(Duration::from_millis(150)).await;

    let result = call_tool(
        &handler,
        "bash",
        json!({ "workingDirectory": tmp(), "commands": "sleep 1; echo done" }),
    )
    .await;
    assert!(!result.is_error);
    let text = text_of(&result);
    assert!(
        text.starts_with("Process backgrounded (ID: task_"),
        "text: {text}"
    );

    // pull the id out of "Process backgrounded (ID: task_<N>). ..."
    let task_id: u64 = text
        .split("task_")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .and_then(|id| id.parse().ok())
        .expect("task id in handle message");

    let mut status_text = String::new();
    for _ in 0..100 {
        let status = call_tool(&handler, "process_status", json!({ "task_id": task_id })).await;
        assert!(!status.is_error);
        status_text = text_of(&status);
        if status_text.contains("\"completed\"") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(status_text.contains("\"completed\""), "status: {status_text}");
    assert!(status_text.contains("done"), "status: {status_text}");

    let closed = call_tool(&handler, "process_close", json!({ "task_id": task_id })).await;
    assert!(!closed.is_error);

    let gone = call_tool(&handler, "process_status", json!({ "task_id": task_id })).await;
    assert!(gone.is_error);

    engine.shutdown().await;
}

#[tokio::test]
async fn nonzero_exit_is_an_error_response_with_the_exit_code() {
    let (handler, engine) = handler_with_foreground(Duration::from_secs(10)).await;

    let result = call_tool(
        &handler,
        "bash",
        json!({ "workingDirectory": tmp(), "commands": "exit 7" }),
    )
    .await;

    assert!(result.is_error);
    assert!(text_of(&result).contains("Exit code: 7"));

    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_language_is_a_failure_response_not_an_exception() {
    let (handler, engine) = handler_with_foreground(Duration::from_secs(10)).await;

    let result = call_tool(
        &handler,
        "execute",
        json!({ "workingDirectory": tmp(), "code": "x", "language": "brainfuck" }),
    )
    .await;

    assert!(result.is_error);
    assert!(text_of(&result).contains("Unsupported runtime: brainfuck"));

    engine.shutdown().await;
}

#[tokio::test]
async fn validation_failures_do_not_create_tasks() {
    let (handler, engine) = handler_with_foreground(Duration::from_secs(10)).await;

    let result = call_tool(
        &handler,
        "execute",
        json!({ "workingDirectory": tmp(), "code": "" }),
    )
    .await;
    assert!(result.is_error);

    engine.shutdown().await;
}
