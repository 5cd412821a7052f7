//! Tool catalogue and dispatch
//!
//! The five tools the server exposes, their input schemas, and the registry
//! that parses arguments and drives the execution engine. Tool-level
//! failures (bad arguments, unknown languages, non-zero exits) are text
//! responses with `isError` set; only unknown tool names escape as protocol
//! errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use glootie_execution::{ExecuteReply, ExecuteRequest, ExecutionEngine};

use crate::error::{McpError, McpResult};
use crate::protocol::{Tool, ToolsCallResult};

/// Upper bound on a single `sleep` call.
pub const SLEEP_CAP_MS: u64 = 295_000;

/// Registry of tools available to connected clients.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn list_tools(&self) -> Vec<Tool>;

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<ToolsCallResult>;
}

/// The tool registry backed by the execution engine.
pub struct GlootieToolRegistry {
    engine: Arc<ExecutionEngine>,
}

impl GlootieToolRegistry {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    #[serde(rename = "workingDirectory")]
    working_directory: String,
    code: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    run_in_background: bool,
}

/// `commands` accepts a single string or an array joined with ` && `.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandInput {
    Single(String),
    Many(Vec<String>),
}

impl CommandInput {
    fn joined(self) -> String {
        match self {
            CommandInput::Single(s) => s,
            CommandInput::Many(parts) => parts.join(" && "),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BashArgs {
    #[serde(rename = "workingDirectory")]
    working_directory: String,
    commands: CommandInput,
    #[serde(default)]
    #[allow(dead_code)]
    language: Option<String>,
    #[serde(default)]
    run_in_background: bool,
}

#[derive(Debug, Deserialize)]
struct TaskIdArgs {
    task_id: i64,
}

#[derive(Debug, Deserialize)]
struct SleepArgs {
    milliseconds: f64,
}

fn parse_args<T: DeserializeOwned>(arguments: Option<Value>) -> Result<T, String> {
    let value = arguments.unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| format!("Invalid arguments: {e}"))
}

/// Clamp a requested sleep to the cap, flooring fractional milliseconds.
pub fn clamp_sleep_ms(requested: f64) -> u64 {
    (requested.max(0.0) as u64).min(SLEEP_CAP_MS)
}

#[async_trait]
impl ToolRegistry for GlootieToolRegistry {
    fn list_tools(&self) -> Vec<Tool> {
        tool_catalog()
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<ToolsCallResult> {
        debug!(tool = name, "tool call");
        match name {
            "execute" => Ok(self.execute(arguments).await),
            "bash" if cfg!(not(windows)) => Ok(self.bash(arguments).await),
            "process_status" => Ok(self.process_status(arguments).await),
            "process_close" => Ok(self.process_close(arguments).await),
            "sleep" => Ok(self.sleep(arguments).await),
            other => Err(McpError::UnknownTool(other.to_string())),
        }
    }
}

impl GlootieToolRegistry {
    async fn execute(&self, arguments: Option<Value>) -> ToolsCallResult {
        let args: ExecuteArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(e) => return ToolsCallResult::error(e),
        };

        self.run(ExecuteRequest {
            code: args.code,
            working_directory: args.working_directory,
            language: args.language,
            run_in_background: args.run_in_background,
            shell: false,
        })
        .await
    }

    async fn bash(&self, arguments: Option<Value>) -> ToolsCallResult {
        let args: BashArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(e) => return ToolsCallResult::error(e),
        };

        self.run(ExecuteRequest {
            code: args.commands.joined(),
            working_directory: args.working_directory,
            language: None,
            run_in_background: args.run_in_background,
            shell: true,
        })
        .await
    }

    async fn run(&self, request: ExecuteRequest) -> ToolsCallResult {
        match self.engine.execute(request).await {
            Ok(ExecuteReply::Completed { result }) => {
                let is_error = !result.success;
                let text = ExecutionEngine::format_result(&result);
                ToolsCallResult {
                    content: vec![crate::protocol::ToolContent::Text { text }],
                    is_error,
                }
            }
            Ok(ExecuteReply::Backgrounded { task_id }) => {
                ToolsCallResult::text(ExecutionEngine::backgrounded_message(task_id))
            }
            Err(e) => ToolsCallResult::error(e.to_string()),
        }
    }

    async fn process_status(&self, arguments: Option<Value>) -> ToolsCallResult {
        let args: TaskIdArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(e) => return ToolsCallResult::error(e),
        };
        if args.task_id <= 0 {
            return ToolsCallResult::error("task_id must be a positive integer");
        }

        match self.engine.task_status(args.task_id as u64).await {
            Some(snapshot) => match serde_json::to_string_pretty(&snapshot) {
                Ok(text) => ToolsCallResult::text(text),
                Err(e) => ToolsCallResult::error(format!("Failed to render task: {e}")),
            },
            None => ToolsCallResult::error(format!("Task {} not found", args.task_id)),
        }
    }

    async fn process_close(&self, arguments: Option<Value>) -> ToolsCallResult {
        let args: TaskIdArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(e) => return ToolsCallResult::error(e),
        };
        if args.task_id <= 0 {
            return ToolsCallResult::error("task_id must be a positive integer");
        }

        if self.engine.close_task(args.task_id as u64).await {
            ToolsCallResult::text(format!("Task {} closed", args.task_id))
        } else {
            ToolsCallResult::error(format!("Task {} not found", args.task_id))
        }
    }

    async fn sleep(&self, arguments: Option<Value>) -> ToolsCallResult {
        let args: SleepArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(e) => return ToolsCallResult::error(e),
        };
        if args.milliseconds < 0.0 || !args.milliseconds.is_finite() {
            return ToolsCallResult::error("milliseconds must be a non-negative number");
        }

        let capped = clamp_sleep_ms(args.milliseconds);
        tokio::time::sleep(Duration::from_millis(capped)).await;
        ToolsCallResult::text(format!("Slept for {capped}ms"))
    }
}

/// The static tool catalogue with input schemas.
pub fn tool_catalog() -> Vec<Tool> {
    let mut tools = vec![Tool {
        name: "execute".to_string(),
        description: "Execute code in an isolated child process. Returns formatted \
                      output, or a task handle when execution outlives the foreground \
                      deadline."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "workingDirectory": { "type": "string" },
                "code": { "type": "string" },
                "language": {
                    "type": "string",
                    "enum": ["nodejs", "typescript", "deno", "go", "rust",
                             "python", "c", "cpp", "java", "auto"]
                },
                "run_in_background": { "type": "boolean" }
            },
            "required": ["workingDirectory", "code"]
        }),
    }];

    if cfg!(not(windows)) {
        tools.push(Tool {
            name: "bash".to_string(),
            description: "Run shell commands. Accepts a single command string or an \
                          array joined with ' && '."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "workingDirectory": { "type": "string" },
                    "commands": {
                        "oneOf": [
                            { "type": "string" },
                            { "type": "array", "items": { "type": "string" } }
                        ]
                    },
                    "language": { "type": "string", "enum": ["bash", "sh", "zsh"] },
                    "run_in_background": { "type": "boolean" }
                },
                "required": ["workingDirectory", "commands"]
            }),
        });
    }

    tools.push(Tool {
        name: "process_status".to_string(),
        description: "Get the status, timestamps, and result of a background task".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "minimum": 1 }
            },
            "required": ["task_id"]
        }),
    });

    tools.push(Tool {
        name: "process_close".to_string(),
        description: "Release a finished background task".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "minimum": 1 }
            },
            "required": ["task_id"]
        }),
    });

    tools.push(Tool {
        name: "sleep".to_string(),
        description: "Sleep for up to 295000 milliseconds".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "milliseconds": { "type": "number", "minimum": 0 }
            },
            "required": ["milliseconds"]
        }),
    });

    tools
}
