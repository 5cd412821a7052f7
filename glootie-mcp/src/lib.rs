//! Glootie MCP server
//!
//! Exposes the execution engine to LLM agents over the Model Context
//! Protocol: a stdio JSON-RPC transport, the tool catalogue (`execute`,
//! `bash`, `process_status`, `process_close`, `sleep`), and the request
//! handler that dispatches between them.

pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::{McpError, McpResult};
pub use handler::RequestHandler;
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, Tool, ToolContent, ToolsCallResult,
};
pub use server::StdioServer;
pub use tools::{tool_catalog, GlootieToolRegistry, ToolRegistry};
