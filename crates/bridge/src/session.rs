//! The bridge session — the turn loop between the model and the tools.
//!
//! One session goes `AwaitingModel → (DispatchingTools → AwaitingModel)*`
//! until the model answers without requesting tools, the turn budget
//! runs out, or an unrecoverable error aborts the run.

use std::time::Duration;

use futures_util::future::join_all;

use mb_domain::config::Config;
use mb_domain::error::{Error, Result};
use mb_domain::tool::{Message, ToolCall, ToolDefinition};
use mb_mcp_client::ToolRegistry;
use mb_providers::{ChatRequest, LlmClient, LlmReply};

use crate::catalog;
use crate::conversation::Conversation;

/// System prompt used when neither the config nor the CLI override one.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the provided tools when \
     they help you answer the question; once you have what you need, reply with the final \
     answer as plain text.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How one session ended (errors abort the run instead).
#[derive(Debug)]
pub enum SessionOutcome {
    /// The model produced a final answer.
    Completed { answer: String, turns: u32 },
    /// The turn budget ran out before the model converged. Carries the
    /// partial transcript so the caller can report what happened.
    MaxTurnsExceeded {
        turns: u32,
        transcript: Vec<Message>,
    },
}

/// Outcome of dispatching a single tool invocation.
///
/// `unresolvable` marks failures where no server could take the call at
/// all (unknown name, dead server); the no-usable-tools loop guard keys
/// off it. A result the server itself flagged as an error is a
/// successful invocation and does not count.
struct DispatchOutcome {
    content: String,
    is_error: bool,
    unresolvable: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BridgeSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BridgeSession<'a> {
    id: uuid::Uuid,
    config: &'a Config,
    llm: &'a dyn LlmClient,
    registry: &'a ToolRegistry,
    conversation: Conversation,
}

impl<'a> BridgeSession<'a> {
    /// Seed a new session with the user's prompt.
    ///
    /// The registry must be fully built; it is read-only from here on.
    /// Connection release stays with the caller (the registry outlives
    /// the session), so every exit path can still shut servers down,
    /// including a session timeout that drops this future mid-flight.
    pub fn new(
        config: &'a Config,
        llm: &'a dyn LlmClient,
        registry: &'a ToolRegistry,
        user_prompt: &str,
    ) -> Self {
        let system_prompt = config
            .session
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        Self {
            id: uuid::Uuid::new_v4(),
            config,
            llm,
            registry,
            conversation: Conversation::new(Some(system_prompt), user_prompt),
        }
    }

    /// Run the turn loop to completion.
    pub async fn run(mut self) -> Result<SessionOutcome> {
        tracing::info!(
            session_id = %self.id,
            model = %self.llm.model(),
            tools = self.registry.tool_count(),
            "starting bridge session"
        );

        let tool_defs = catalog::project(&self.registry.catalog());
        let max_turns = self.config.session.max_turns;
        let mut failed_tool_turns = 0u32;

        for turn in 1..=max_turns {
            tracing::debug!(session_id = %self.id, turn, "awaiting model");
            let reply = self.generate_with_retry(&tool_defs).await?;

            let (text, calls) = match reply {
                LlmReply::Final { text } => {
                    self.conversation.add_assistant_text(&text);
                    tracing::info!(session_id = %self.id, turns = turn, "session completed");
                    return Ok(SessionOutcome::Completed { answer: text, turns: turn });
                }
                LlmReply::ToolCalls { text, calls } => (text, calls),
            };

            // Mirror the requested calls in the transcript before
            // dispatching, so the model's own request is on record.
            self.conversation
                .add_assistant_tool_use(text.as_deref(), &calls);

            tracing::debug!(
                session_id = %self.id,
                turn,
                batch = calls.len(),
                "dispatching tool calls"
            );
            let outcomes = self.dispatch(&calls).await;

            let all_unresolvable =
                !outcomes.is_empty() && outcomes.iter().all(|o| o.unresolvable);
            for (call, outcome) in calls.iter().zip(&outcomes) {
                self.conversation.add_tool_result(
                    &call.call_id,
                    &outcome.content,
                    outcome.is_error,
                );
            }

            if all_unresolvable {
                failed_tool_turns += 1;
                if failed_tool_turns >= self.config.session.max_failed_tool_turns {
                    return Err(Error::NoUsableTools(format!(
                        "{failed_tool_turns} consecutive turns produced only unresolvable \
                         tool calls"
                    )));
                }
            } else {
                failed_tool_turns = 0;
            }
        }

        tracing::warn!(
            session_id = %self.id,
            max_turns,
            "session did not converge within the turn budget"
        );
        Ok(SessionOutcome::MaxTurnsExceeded {
            turns: max_turns,
            transcript: self.conversation.messages().to_vec(),
        })
    }

    /// Call the model, retrying transient failures with exponential
    /// backoff up to the configured budget.
    async fn generate_with_retry(&self, tools: &[ToolDefinition]) -> Result<LlmReply> {
        let req = ChatRequest {
            messages: self.conversation.messages().to_vec(),
            tools: tools.to_vec(),
        };
        let mut backoff = Duration::from_millis(self.config.llm.retry_backoff_ms);
        let mut attempt = 0u32;
        loop {
            match self.llm.generate(&req).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retriable() && attempt < self.config.llm.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        session_id = %self.id,
                        error = %e,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient LLM failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch one batch of tool calls.
    ///
    /// Fan-out/fan-in: calls to different servers run concurrently
    /// (calls to one server queue on its transport lock), and `join_all`
    /// yields outcomes in request order regardless of completion order,
    /// so the transcript stays deterministic.
    async fn dispatch(&self, calls: &[ToolCall]) -> Vec<DispatchOutcome> {
        let futures: Vec<_> = calls.iter().map(|call| self.invoke(call)).collect();
        join_all(futures).await
    }

    /// Resolve and invoke a single call, converting every failure into a
    /// result the model can react to; it must see an answer for every
    /// call id it issued.
    async fn invoke(&self, call: &ToolCall) -> DispatchOutcome {
        let server = match self.registry.resolve(&call.tool_name) {
            Ok(server) => server,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    tool = %call.tool_name,
                    "model requested an unknown tool"
                );
                return DispatchOutcome {
                    content: e.to_string(),
                    is_error: true,
                    unresolvable: true,
                };
            }
        };

        match server.call_tool(&call.tool_name, call.arguments.clone()).await {
            Ok(result) => DispatchOutcome {
                content: result.text(),
                is_error: result.is_error,
                unresolvable: false,
            },
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    tool = %call.tool_name,
                    server_id = %server.id(),
                    error = %e,
                    "tool invocation failed"
                );
                let unresolvable =
                    matches!(e, Error::ServerDown(_) | Error::Connection(_));
                DispatchOutcome {
                    content: e.to_string(),
                    is_error: true,
                    unresolvable,
                }
            }
        }
    }

    /// The transcript so far. Mutated only by the session itself.
    pub fn transcript(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }
}
