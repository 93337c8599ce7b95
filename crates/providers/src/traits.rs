use async_trait::async_trait;

use mb_domain::error::Result;
use mb_domain::tool::{Message, ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Reply types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request: the full transcript
/// plus the projected tool catalog.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send, in transcript order.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
}

/// What the model decided to do with the turn.
///
/// The session switches on this tag and nothing else; raw wire shapes
/// never leave the adapter.
#[derive(Debug, Clone)]
pub enum LlmReply {
    /// A final textual answer; the session is done.
    Final { text: String },
    /// One batch of tool invocations, in the order the model issued them,
    /// with any accompanying assistant text.
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter must implement.
///
/// Implementations translate between the internal types and the wire
/// format of a concrete HTTP API, and map failures onto the shared error
/// taxonomy (`Auth`, `RateLimit`, `Service`, `Timeout`, `Protocol`) so
/// the session can pick a retry policy without inspecting providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the transcript and tool catalog, wait for the full response.
    async fn generate(&self, req: &ChatRequest) -> Result<LlmReply>;

    /// The model this client targets (diagnostics only).
    fn model(&self) -> &str;
}
