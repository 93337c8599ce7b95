//! Process-wide configuration.
//!
//! Built once at startup from `MCPBRIDGE_*` environment variables and
//! passed by reference into the LLM client and the bridge session. The
//! core never does ambient lookups, so tests can inject any values.

use std::collections::HashMap;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub tools: ToolTimeoutConfig,
}

/// Settings for the LLM service client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Bearer token for the service. Required; everything else has a default.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Sampling temperature, 0.0 ..= 2.0.
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout, seconds.
    pub timeout_secs: u64,
    /// Bounded retry budget for transient failures (rate limit, timeout, 5xx).
    pub max_retries: u32,
    /// Initial backoff delay before the first retry; doubles per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4".into(),
            temperature: 1.0,
            max_tokens: 4096,
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl LlmConfig {
    /// The API key with all but the first characters masked, for logging.
    pub fn masked_key(&self) -> String {
        if self.api_key.len() > 8 {
            format!("{}...", &self.api_key[..8])
        } else {
            "***".into()
        }
    }
}

/// Settings for one bridge session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of model calls before the session gives up.
    pub max_turns: u32,
    /// Wall-clock bound on the whole session, seconds.
    pub timeout_secs: u64,
    /// Consecutive turns in which every tool call was unresolvable before
    /// the session aborts instead of looping forever.
    pub max_failed_tool_turns: u32,
    /// Overrides the built-in system prompt when set.
    pub system_prompt: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            timeout_secs: 600,
            max_failed_tool_turns: 3,
            system_prompt: None,
        }
    }
}

/// Timeouts applied to tool server I/O.
#[derive(Debug, Clone)]
pub struct ToolTimeoutConfig {
    /// Bound on spawn + handshake + tool discovery, seconds.
    pub connect_timeout_secs: u64,
    /// Bound on a single `tools/call`, seconds.
    pub call_timeout_secs: u64,
}

impl Default for ToolTimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            call_timeout_secs: 30,
        }
    }
}

/// One tool server to spawn, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerConfig {
    /// User-supplied label, used in diagnostics and duplicate-tool errors.
    pub id: String,
    /// The command to spawn (e.g. `python`).
    pub command: String,
    /// Arguments to pass to the command.
    pub args: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load and validate configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let llm = LlmConfig {
            api_key: required_var(vars, "MCPBRIDGE_LLM_API_KEY")?,
            base_url: optional_var(vars, "MCPBRIDGE_LLM_BASE_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            model: optional_var(vars, "MCPBRIDGE_LLM_MODEL", "gpt-4"),
            temperature: float_var(vars, "MCPBRIDGE_LLM_TEMPERATURE", 1.0, 0.0, 2.0)?,
            max_tokens: int_var(vars, "MCPBRIDGE_LLM_MAX_TOKENS", 4096, 1)?,
            timeout_secs: int_var(vars, "MCPBRIDGE_LLM_TIMEOUT", 120, 1)? as u64,
            max_retries: int_var(vars, "MCPBRIDGE_LLM_MAX_RETRIES", 2, 0)?,
            retry_backoff_ms: int_var(vars, "MCPBRIDGE_LLM_RETRY_BACKOFF_MS", 500, 1)? as u64,
        };

        let session = SessionConfig {
            max_turns: int_var(vars, "MCPBRIDGE_SESSION_MAX_TURNS", 10, 1)?,
            timeout_secs: int_var(vars, "MCPBRIDGE_SESSION_TIMEOUT", 600, 1)? as u64,
            max_failed_tool_turns: int_var(vars, "MCPBRIDGE_SESSION_MAX_FAILED_TOOL_TURNS", 3, 1)?,
            system_prompt: vars
                .get("MCPBRIDGE_SYSTEM_PROMPT")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        };

        let tools = ToolTimeoutConfig {
            connect_timeout_secs: int_var(vars, "MCPBRIDGE_TOOL_CONNECT_TIMEOUT", 15, 1)? as u64,
            call_timeout_secs: int_var(vars, "MCPBRIDGE_TOOL_CALL_TIMEOUT", 30, 1)? as u64,
        };

        tracing::debug!(
            model = %llm.model,
            base_url = %llm.base_url,
            api_key = %llm.masked_key(),
            "configuration loaded"
        );

        Ok(Self { llm, session, tools })
    }
}

fn required_var(vars: &HashMap<String, String>, name: &str) -> Result<String> {
    match vars.get(name).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::Config(format!(
            "required environment variable '{name}' is not set"
        ))),
    }
}

fn optional_var(vars: &HashMap<String, String>, name: &str, default: &str) -> String {
    match vars.get(name).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

fn float_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: f32,
    min: f32,
    max: f32,
) -> Result<f32> {
    let Some(raw) = vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let value: f32 = raw
        .parse()
        .map_err(|_| Error::Config(format!("'{name}' must be a number, got '{raw}'")))?;
    if value < min || value > max {
        return Err(Error::Config(format!(
            "'{name}' must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

fn int_var(vars: &HashMap<String, String>, name: &str, default: u32, min: u32) -> Result<u32> {
    let Some(raw) = vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let value: u32 = raw
        .parse()
        .map_err(|_| Error::Config(format!("'{name}' must be an integer, got '{raw}'")))?;
    if value < min {
        return Err(Error::Config(format!(
            "'{name}' must be >= {min}, got {value}"
        )));
    }
    Ok(value)
}
