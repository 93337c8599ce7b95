//! One connected tool server: spawn, handshake, discovery, dispatch.

use std::time::Duration;

use serde_json::Value;

use mb_domain::config::{ToolServerConfig, ToolTimeoutConfig};
use mb_domain::error::{Error, Result};

use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{McpTransport, StdioTransport, TransportError};

/// A connected tool server and the tools it advertised.
///
/// The connection is opened by [`ToolServer::connect`] before the
/// session's first turn and released by [`ToolServer::shutdown`] on
/// every exit path. Invocations on one server are serialized by the
/// transport's internal cycle lock.
pub struct ToolServer {
    id: String,
    tools: Vec<McpToolDef>,
    transport: Box<dyn McpTransport>,
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("id", &self.id)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl ToolServer {
    /// Spawn the configured command and run the MCP handshake
    /// (`initialize` → `notifications/initialized` → `tools/list`),
    /// bounded by the configured connect timeout.
    pub async fn connect(
        config: &ToolServerConfig,
        timeouts: &ToolTimeoutConfig,
    ) -> Result<Self> {
        let call_timeout = Duration::from_secs(timeouts.call_timeout_secs);
        let transport = StdioTransport::spawn(config, call_timeout).map_err(|e| {
            Error::Connection(format!(
                "failed to spawn tool server '{}' ({} {}): {e}",
                config.id,
                config.command,
                config.args.join(" ")
            ))
        })?;

        let connect_timeout = Duration::from_secs(timeouts.connect_timeout_secs);
        let handshake = Self::handshake(&config.id, &transport);
        let tools = match tokio::time::timeout(connect_timeout, handshake).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                transport.shutdown().await;
                return Err(e);
            }
            Err(_) => {
                transport.shutdown().await;
                return Err(Error::Connection(format!(
                    "tool server '{}' did not complete its handshake within {}s",
                    config.id, timeouts.connect_timeout_secs
                )));
            }
        };

        tracing::info!(
            server_id = %config.id,
            tool_count = tools.len(),
            "tool server connected"
        );

        Ok(Self {
            id: config.id.clone(),
            tools,
            transport: Box::new(transport),
        })
    }

    /// Assemble a server from parts.
    ///
    /// This is how embedders plug in a custom [`McpTransport`]; the
    /// in-process fakes used by the test suite go through here too.
    pub fn with_transport(
        id: impl Into<String>,
        tools: Vec<McpToolDef>,
        transport: Box<dyn McpTransport>,
    ) -> Self {
        Self {
            id: id.into(),
            tools,
            transport,
        }
    }

    async fn handshake(id: &str, transport: &StdioTransport) -> Result<Vec<McpToolDef>> {
        let init_params = serde_json::to_value(protocol::initialize_params())?;
        let resp = transport
            .send_request("initialize", Some(init_params))
            .await
            .map_err(|e| connect_error(id, "initialize", e))?;
        if let Err(rpc_err) = resp.into_result() {
            return Err(Error::Protocol(format!(
                "tool server '{id}': initialize failed: {rpc_err}"
            )));
        }

        transport
            .send_notification("notifications/initialized")
            .await
            .map_err(|e| connect_error(id, "notifications/initialized", e))?;

        let resp = transport
            .send_request("tools/list", None)
            .await
            .map_err(|e| connect_error(id, "tools/list", e))?;
        let value = resp.into_result().map_err(|rpc_err| {
            Error::Protocol(format!("tool server '{id}': tools/list failed: {rpc_err}"))
        })?;
        let listed: ToolsListResult = serde_json::from_value(value).map_err(|e| {
            Error::Protocol(format!(
                "tool server '{id}': malformed tools/list advertisement: {e}"
            ))
        })?;
        Ok(listed.tools)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tools advertised at connect time. Fixed for the connection's lifetime.
    pub fn tools(&self) -> &[McpToolDef] {
        &self.tools
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Invoke a tool on this server.
    ///
    /// A JSON-RPC-level error comes back as `Err(Error::Protocol)`; a
    /// result with `isError: true` is a *successful* invocation whose
    /// outcome the model gets to see.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult> {
        if !self.transport.is_alive() {
            return Err(Error::ServerDown(self.id.clone()));
        }

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let resp = self
            .transport
            .send_request("tools/call", Some(params))
            .await
            .map_err(|e| self.call_error(tool_name, e))?;

        let value = resp.into_result().map_err(|rpc_err| {
            Error::Protocol(format!(
                "tool server '{}': tools/call '{tool_name}' failed: {rpc_err}",
                self.id
            ))
        })?;
        serde_json::from_value::<ToolCallResult>(value).map_err(|e| {
            Error::Protocol(format!(
                "tool server '{}': malformed tools/call result for '{tool_name}': {e}",
                self.id
            ))
        })
    }

    fn call_error(&self, tool_name: &str, e: TransportError) -> Error {
        match e {
            TransportError::ProcessExited => Error::ServerDown(self.id.clone()),
            TransportError::Timeout => Error::Timeout(format!(
                "tools/call '{tool_name}' on server '{}'",
                self.id
            )),
            TransportError::Io(e) => {
                Error::Connection(format!("tool server '{}': {e}", self.id))
            }
            TransportError::Json(e) => {
                Error::Protocol(format!("tool server '{}': {e}", self.id))
            }
        }
    }

    /// Gracefully shut down the server. Safe to call more than once and
    /// after a prior failure.
    pub async fn shutdown(&self) {
        tracing::info!(server_id = %self.id, "shutting down tool server");
        self.transport.shutdown().await;
    }
}

fn connect_error(id: &str, step: &str, e: TransportError) -> Error {
    match e {
        TransportError::Json(e) => {
            Error::Protocol(format!("tool server '{id}': {step}: {e}"))
        }
        other => Error::Connection(format!("tool server '{id}': {step}: {other}")),
    }
}
