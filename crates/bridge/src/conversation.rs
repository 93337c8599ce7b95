//! The conversation transcript.
//!
//! An ordered, append-only sequence of messages: the literal context
//! window sent to the model on every turn. Only the bridge session
//! appends; nothing is ever mutated or removed.

use mb_domain::tool::{Message, ToolCall};

pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Seed the transcript: optional system turn, then the user prompt.
    pub fn new(system_prompt: Option<&str>, user_prompt: &str) -> Self {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            if !system.is_empty() {
                messages.push(Message::system(system));
            }
        }
        messages.push(Message::user(user_prompt));
        Self { messages }
    }

    /// Append the model's final textual answer.
    pub fn add_assistant_text(&mut self, text: &str) {
        self.messages.push(Message::assistant(text));
    }

    /// Append an assistant turn mirroring the tool calls the model
    /// requested, so the transcript records what was actually asked.
    pub fn add_assistant_tool_use(&mut self, text: Option<&str>, calls: &[ToolCall]) {
        self.messages.push(Message::assistant_tool_use(text, calls));
    }

    /// Append one tool result, correlated to its call id.
    pub fn add_tool_result(&mut self, call_id: &str, content: &str, is_error: bool) {
        self.messages
            .push(Message::tool_result(call_id, content, is_error));
    }

    /// The transcript in insertion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
