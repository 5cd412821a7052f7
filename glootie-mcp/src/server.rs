//! Stdio transport
//!
//! Newline-delimited JSON-RPC over stdin/stdout. When the transport closes
//! (the parent went away), the engine is shut down, which kills any active
//! children and finalises their tasks.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use glootie_execution::ExecutionEngine;

use crate::handler::RequestHandler;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// MCP server over stdin/stdout.
pub struct StdioServer {
    handler: RequestHandler,
    engine: Arc<ExecutionEngine>,
}

impl StdioServer {
    pub fn new(handler: RequestHandler, engine: Arc<ExecutionEngine>) -> Self {
        Self { handler, engine }
    }

    /// Serve until stdin closes, then shut the engine down.
    pub async fn run(&self) -> std::io::Result<()> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let mut stdout = tokio::io::stdout();

        info!("stdio transport ready");

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => {
                    debug!(method = %request.method, "request received");
                    self.handler.handle(request).await
                }
                Err(e) => {
                    warn!("unparseable request: {e}");
                    Some(JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::parse_error(e.to_string()),
                    ))
                }
            };

            if let Some(response) = response {
                let mut payload = serde_json::to_string(&response)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                payload.push('\n');
                stdout.write_all(payload.as_bytes()).await?;
                stdout.flush().await?;
            }
        }

        info!("stdio transport closed, shutting down engine");
        self.engine.shutdown().await;
        Ok(())
    }
}
