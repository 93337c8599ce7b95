/// Shared error type used across all mcpbridge crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Suggested retry delay from the `Retry-After` header, seconds.
        retry_after: Option<f64>,
    },

    #[error("llm service: HTTP {status} - {message}")]
    Service { status: u16, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("duplicate tool '{tool}': advertised by both '{first}' and '{second}'")]
    DuplicateTool {
        tool: String,
        first: String,
        second: String,
    },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool server is down: {0}")]
    ServerDown(String),

    #[error("no usable tools: {0}")]
    NoUsableTools(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error class used by the CLI to print a categorized one-line
/// message instead of a raw error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    ToolServer,
    LlmService,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration error",
            ErrorCategory::ToolServer => "tool server error",
            ErrorCategory::LlmService => "llm service error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal error",
        }
    }
}

impl Error {
    /// Whether the bridge session may retry the failed LLM call.
    ///
    /// Only transient service conditions qualify; credential and protocol
    /// failures never do.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::RateLimit { .. } | Error::Timeout(_) => true,
            Error::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::DuplicateTool { .. } => ErrorCategory::Configuration,
            Error::Auth(_) | Error::RateLimit { .. } | Error::Service { .. } => {
                ErrorCategory::LlmService
            }
            Error::Connection(_)
            | Error::ServerDown(_)
            | Error::UnknownTool(_)
            | Error::NoUsableTools(_) => ErrorCategory::ToolServer,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::Cancelled(_) => ErrorCategory::Cancelled,
            Error::Io(_) | Error::Json(_) | Error::Protocol(_) => ErrorCategory::Internal,
        }
    }
}
