//! Tool registry — one namespace over every connected tool server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mb_domain::config::{ToolServerConfig, ToolTimeoutConfig};
use mb_domain::error::{Error, Result};

use crate::protocol::McpToolDef;
use crate::server::ToolServer;

/// Maps each advertised tool name to the server that owns it.
///
/// Built once during session setup and read-only afterwards; the turn
/// loop never sees a registration error. Two servers advertising the
/// same tool name is a configuration error surfaced before the first
/// turn, since silent shadowing would make dispatch depend on
/// registration order.
#[derive(Default)]
pub struct ToolRegistry {
    servers: Vec<Arc<ToolServer>>,
    by_tool: HashMap<String, Arc<ToolServer>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every configured server and register its tools.
    ///
    /// A server that fails to connect is skipped with a warning; if all
    /// of them fail the session has nothing to dispatch to and setup
    /// aborts. Duplicate tool names abort setup after shutting down
    /// everything already spawned.
    pub async fn connect_all(
        configs: &[ToolServerConfig],
        timeouts: &ToolTimeoutConfig,
    ) -> Result<Self> {
        let mut registry = Self::new();
        let mut failures = Vec::new();

        for config in configs {
            tracing::info!(
                server_id = %config.id,
                command = %config.command,
                "connecting tool server"
            );
            match ToolServer::connect(config, timeouts).await {
                Ok(server) => {
                    if let Err(e) = registry.register(Arc::new(server)) {
                        registry.shutdown().await;
                        return Err(e);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        server_id = %config.id,
                        error = %e,
                        "tool server failed to connect, skipping"
                    );
                    failures.push(format!("{}: {e}", config.id));
                }
            }
        }

        if registry.servers.is_empty() && !configs.is_empty() {
            return Err(Error::Connection(format!(
                "no tool server could be connected ({})",
                failures.join("; ")
            )));
        }

        tracing::info!(
            servers = registry.server_count(),
            tools = registry.tool_count(),
            "tool registry ready"
        );
        Ok(registry)
    }

    /// Add a server and all of its tools to the namespace.
    ///
    /// Registration is atomic: on a name collision (with an already
    /// registered server, or within the new server's own advertisement)
    /// nothing from this server is registered.
    pub fn register(&mut self, server: Arc<ToolServer>) -> Result<()> {
        let mut batch: HashSet<&str> = HashSet::with_capacity(server.tools().len());
        for tool in server.tools() {
            if let Some(owner) = self.by_tool.get(&tool.name) {
                return Err(Error::DuplicateTool {
                    tool: tool.name.clone(),
                    first: owner.id().to_string(),
                    second: server.id().to_string(),
                });
            }
            if !batch.insert(&tool.name) {
                return Err(Error::DuplicateTool {
                    tool: tool.name.clone(),
                    first: server.id().to_string(),
                    second: server.id().to_string(),
                });
            }
        }

        for tool in server.tools() {
            self.by_tool.insert(tool.name.clone(), server.clone());
        }
        self.servers.push(server);
        Ok(())
    }

    /// The server owning `name`, or [`Error::UnknownTool`].
    pub fn resolve(&self, name: &str) -> Result<Arc<ToolServer>> {
        self.by_tool
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(name.to_string()))
    }

    /// Every discovered tool across all servers, as `(server_id, tool)`.
    pub fn catalog(&self) -> Vec<(&str, &McpToolDef)> {
        self.servers
            .iter()
            .flat_map(|server| server.tools().iter().map(move |tool| (server.id(), tool)))
            .collect()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.by_tool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Whether any registered server is still alive.
    pub fn any_alive(&self) -> bool {
        self.servers.iter().any(|s| s.is_alive())
    }

    /// Gracefully shut down all servers concurrently.
    pub async fn shutdown(&self) {
        let futs: Vec<_> = self.servers.iter().map(|s| s.shutdown()).collect();
        futures_util::future::join_all(futs).await;
    }
}
