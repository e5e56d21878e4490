use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::providers::errors::ProviderError;

/// Errors raised while resolving or executing a single tool call.
///
/// These never abort a conversation run: they are fed back to the language
/// backend as the result of the tool call that produced them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Structured payload handed to the backend in place of a tool result
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Terminal outcomes of a conversation run that are surfaced to the caller.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("AI service not configured: {0}")]
    Configuration(String),

    #[error("AI service is busy: {0}")]
    RateLimited(String),

    #[error("AI service quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("AI service request failed: {0}")]
    Backend(String),

    #[error("AI service returned an empty response")]
    EmptyResponse,

    #[error("Conversation was cancelled")]
    Cancelled,

    #[error("Conversation exceeded its deadline")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::RateLimited(_) | ChatError::DeadlineExceeded)
    }
}

impl From<ProviderError> for ChatError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(msg) | ProviderError::Authentication(msg) => {
                ChatError::Configuration(msg)
            }
            ProviderError::RateLimited(msg) => ChatError::RateLimited(msg),
            ProviderError::QuotaExhausted(msg) => ChatError::QuotaExhausted(msg),
            other => ChatError::Backend(other.to_string()),
        }
    }
}
