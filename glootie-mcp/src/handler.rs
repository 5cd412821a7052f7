//! JSON-RPC request handler

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{McpError, McpResult};
use crate::protocol::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ServerInfo,
    ToolsCallParams, ToolsListResult, MCP_PROTOCOL_VERSION,
};
use crate::tools::ToolRegistry;

/// Dispatches protocol methods onto the tool registry.
pub struct RequestHandler {
    registry: Arc<dyn ToolRegistry>,
}

impl RequestHandler {
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Handle one request. Notifications get no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "notification ignored");
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let result = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => self.tools_list(),
            "tools/call" => self.tools_call(request.params).await,
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, e.into()),
        })
    }

    fn initialize(&self) -> Value {
        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: "glootie".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        json!(result)
    }

    fn tools_list(&self) -> McpResult<Value> {
        let result = ToolsListResult {
            tools: self.registry.list_tools(),
        };
        serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
    }

    async fn tools_call(&self, params: Option<Value>) -> McpResult<Value> {
        let params: ToolsCallParams = serde_json::from_value(
            params.ok_or_else(|| McpError::InvalidParams("missing parameters".to_string()))?,
        )?;

        let result = self.registry.call_tool(&params.name, params.arguments).await?;
        serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
    }
}
