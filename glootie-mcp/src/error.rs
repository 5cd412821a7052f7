//! MCP server error types

use thiserror::Error;

use crate::protocol::JsonRpcError;

/// Errors that surface as JSON-RPC protocol errors. Tool-level failures
/// never land here; they become text responses with `isError` set.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type McpResult<T> = Result<T, McpError>;

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::InvalidParams(err.to_string())
    }
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::MethodNotFound(method) => JsonRpcError::method_not_found(&method),
            McpError::InvalidParams(details) => JsonRpcError::invalid_params(details),
            McpError::UnknownTool(name) => {
                JsonRpcError::invalid_params(format!("unknown tool: {name}"))
            }
            McpError::Internal(message) => JsonRpcError::internal_error(message),
        }
    }
}
