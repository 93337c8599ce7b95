//! `mb-mcp-client` — tool server client for mcpbridge.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for talking to MCP-style tool servers.
//! - A stdio transport that spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout.
//! - [`ToolServer`], one connected server with its discovered tools.
//! - [`ToolRegistry`], the aggregate namespace over every connected
//!   server, with fail-fast duplicate detection.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mb_mcp_client::ToolRegistry;
//!
//! let registry = ToolRegistry::connect_all(&configs, &timeouts).await?;
//! let server = registry.resolve("read_file")?;
//! let result = server.call_tool("read_file", json!({"path": "/tmp/x"})).await?;
//! registry.shutdown().await;
//! ```

pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

// Re-exports for convenience.
pub use protocol::{McpToolDef, ToolCallResult};
pub use registry::ToolRegistry;
pub use server::ToolServer;
pub use transport::{McpTransport, StdioTransport, TransportError};
