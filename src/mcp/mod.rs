//! MCP (Model Context Protocol) server implementation
//!
//! Exposes the Weaviate search tools over the streamable-HTTP transport.

mod server;
mod tools;
mod types;

pub use server::{AppState, McpServer, SERVICE_NAME};
pub use types::{ErrorCode, McpError, McpRequest, McpResponse, ToolContent, ToolResult};
