//! Error types for ImmAgent operations

use crate::{AgentId, ConversationId, MessageId, TextAssetId};
use thiserror::Error;

/// Input validation errors, raised before any I/O.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A referenced asset could not be resolved.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("Agent {0} not found")]
    Agent(AgentId),

    #[error("Conversation {0} not found")]
    Conversation(ConversationId),

    #[error("System prompt {0} not found")]
    SystemPrompt(TextAssetId),

    #[error("Message {0} not found")]
    Message(MessageId),
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No completion provider configured for model '{model}'")]
    ProviderNotConfigured { model: String },

    #[error("Transport error from {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("Request to {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Invalid request to {provider}: {reason}")]
    InvalidRequest { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl LlmError {
    /// Whether retrying the call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::RequestFailed { status, .. } => *status >= 500,
            Self::ProviderNotConfigured { .. }
            | Self::InvalidApiKey { .. }
            | Self::InvalidRequest { .. }
            | Self::InvalidResponse { .. } => false,
        }
    }
}

/// Tool execution errors. The advance loop converts these to textual
/// tool-result messages; they never reach the caller from a turn.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("Tool '{tool}' failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },
}

/// Persistence layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection pool exhausted: {reason}")]
    PoolExhausted { reason: String },

    #[error("Integrity violation: {detail}")]
    Integrity { detail: String },

    #[error("Database error: {reason}")]
    Database { reason: String },
}

/// Master error type for all ImmAgent operations.
#[derive(Debug, Clone, Error)]
pub enum ImmAgentError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for ImmAgent operations.
pub type ImmAgentResult<T> = Result<T, ImmAgentError>;
