//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-hosted gateways, Ollama, vLLM, and any other
//! endpoint that follows the OpenAI chat completions contract.

use serde_json::Value;

use mb_domain::config::LlmConfig;
use mb_domain::error::{Error, Result};
use mb_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::traits::{ChatRequest, LlmClient, LlmReply};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM client for any OpenAI-compatible chat completions endpoint.
#[derive(Debug)]
pub struct OpenAiCompatClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Build a client from the resolved configuration.
    ///
    /// A missing API key is a configuration error raised here, before
    /// any conversation turn runs.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config(
                "no API key configured: set MCPBRIDGE_LLM_API_KEY".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.text().unwrap_or(""),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({ "role": "assistant" });
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.text().unwrap_or(""),
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Interpret a chat completions response body as a tagged reply.
///
/// A response that claims tool calls but carries a fragment that cannot
/// be parsed is a protocol error. Dropping the fragment would desync the
/// transcript: the model would wait for a result we never produce.
fn parse_chat_reply(body: &Value) -> Result<LlmReply> {
    let message = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| Error::Protocol("no choices in LLM response".into()))?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    match message.get("tool_calls") {
        None | Some(Value::Null) => Ok(LlmReply::Final { text }),
        Some(Value::Array(raw_calls)) if raw_calls.is_empty() => Ok(LlmReply::Final { text }),
        Some(Value::Array(raw_calls)) => {
            let mut calls = Vec::with_capacity(raw_calls.len());
            for raw in raw_calls {
                calls.push(parse_tool_call(raw)?);
            }
            Ok(LlmReply::ToolCalls {
                text: if text.is_empty() { None } else { Some(text) },
                calls,
            })
        }
        Some(other) => Err(Error::Protocol(format!(
            "tool_calls is not an array: {other}"
        ))),
    }
}

fn parse_tool_call(raw: &Value) -> Result<ToolCall> {
    let malformed = |what: &str| Error::Protocol(format!("malformed tool call ({what}): {raw}"));

    let call_id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("missing id"))?
        .to_string();
    let func = raw.get("function").ok_or_else(|| malformed("missing function"))?;
    let tool_name = func
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("missing function.name"))?
        .to_string();

    // `arguments` is a JSON string per the wire format; some providers
    // send an empty string for argument-less tools.
    let args_str = func
        .get("arguments")
        .and_then(|v| v.as_str())
        .unwrap_or("{}");
    let arguments: Value = if args_str.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(args_str)
            .map_err(|_| malformed("function.arguments is not valid JSON"))?
    };

    Ok(ToolCall {
        call_id,
        tool_name,
        arguments,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("LLM request: {e}"))
    } else {
        Error::Connection(format!("LLM request: {e}"))
    }
}

/// Map a non-2xx response onto the error taxonomy the session retries by.
fn status_to_error(status: u16, retry_after: Option<f64>, body: &str) -> Error {
    // Prefer the structured error message when the body carries one.
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| truncate(body, 200));

    match status {
        401 | 403 => Error::Auth(format!("LLM service rejected credentials: {message}")),
        429 => Error::RateLimit {
            message,
            retry_after,
        },
        _ => Error::Service { status, message },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(&self, req: &ChatRequest) -> Result<LlmReply> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(
            model = %self.config.model,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "sending chat completion request"
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(status_to_error(status.as_u16(), retry_after, &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)
            .map_err(|e| Error::Protocol(format!("LLM response is not valid JSON: {e}")))?;
        parse_chat_reply(&resp_json)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
