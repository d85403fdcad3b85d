//! The four immutable asset kinds.
//!
//! Assets are frozen at construction. Appending a turn, executing a tool
//! round, or changing an agent's configuration never mutates an existing
//! value; it builds a new one with a fresh UUID that points back at its
//! predecessors.

use crate::{
    now, AgentId, AssetIdType, ConversationId, MessageId, ModelConfig, TextAssetId, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

// ============================================================================
// ROLES
// ============================================================================

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Convert to the database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    /// Parse from the database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, RoleParseError> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            _ => Err(RoleParseError(s.to_string())),
        }
    }
}

/// Error parsing a Role from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleParseError(pub String);

impl std::fmt::Display for RoleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid message role: {}", self.0)
    }
}

impl std::error::Error for RoleParseError {}

// ============================================================================
// TEXT ASSET
// ============================================================================

/// Immutable free-text payload referenced by UUID (system prompts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAsset {
    pub id: TextAssetId,
    pub created_at: Timestamp,
    pub content: String,
}

impl TextAsset {
    /// Create a new text asset with a fresh ID and timestamp.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: TextAssetId::generate(),
            created_at: now(),
            content: content.into(),
        }
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// A tool invocation requested by the assistant.
///
/// Not an asset itself; always embedded in a `Message`. `arguments` is the
/// provider's raw JSON string, preserved byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// An immutable message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub created_at: Timestamp,
    pub role: Role,
    /// May be None on assistant messages that only request tools.
    pub content: Option<String>,
    /// Ordered tool-call requests; empty for non-assistant messages.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// On `Role::Tool` messages, the id of the originating call.
    pub tool_call_id: Option<String>,
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            created_at: now(),
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Create an assistant message, optionally carrying tool calls and
    /// usage counters from the provider.
    pub fn assistant(
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            created_at: now(),
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            input_tokens,
            output_tokens,
        }
    }

    /// Create a tool-result message answering the call with `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            created_at: now(),
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            input_tokens: None,
            output_tokens: None,
        }
    }
}

// ============================================================================
// CONVERSATIONS
// ============================================================================

/// An immutable snapshot of a conversation: an ordered list of message IDs.
///
/// Any change (an appended turn, a tool round) yields a new conversation
/// with a new UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: Timestamp,
    pub message_ids: Vec<MessageId>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new() -> Self {
        Self::from_message_ids(Vec::new())
    }

    /// Create a conversation over an existing ordered list of message IDs.
    pub fn from_message_ids(message_ids: Vec<MessageId>) -> Self {
        debug_assert!(has_no_duplicates(&message_ids));
        Self {
            id: ConversationId::generate(),
            created_at: now(),
            message_ids,
        }
    }

    /// Create a new conversation with `new_ids` appended. The receiver is
    /// untouched; its snapshot remains valid.
    pub fn with_messages(&self, new_ids: &[MessageId]) -> Self {
        let mut message_ids = Vec::with_capacity(self.message_ids.len() + new_ids.len());
        message_ids.extend_from_slice(&self.message_ids);
        message_ids.extend_from_slice(new_ids);
        Self::from_message_ids(message_ids)
    }

    /// Number of messages in the snapshot.
    pub fn len(&self) -> usize {
        self.message_ids.len()
    }

    /// True when the snapshot holds no messages.
    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

fn has_no_duplicates(ids: &[MessageId]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().all(|id| seen.insert(*id))
}

// ============================================================================
// AGENT VERSIONS
// ============================================================================

/// One immutable version of an agent.
///
/// Every turn produces a new version whose `parent_id` references the
/// previous one; the `parent_id` relation forms a forest of lineages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVersion {
    pub id: AgentId,
    pub created_at: Timestamp,
    pub name: String,
    pub system_prompt_id: TextAssetId,
    /// None for roots; reset to None by the backend when the parent is
    /// explicitly deleted.
    pub parent_id: Option<AgentId>,
    pub conversation_id: ConversationId,
    /// Opaque provider-routing string (e.g. "anthropic/claude-3-5-haiku").
    pub model: String,
    pub model_config: ModelConfig,
    /// Free-form caller annotations, carried through evolve/clone.
    #[serde(default)]
    pub metadata: JsonMap<String, JsonValue>,
}

impl AgentVersion {
    /// Create a root version (no parent).
    pub fn root(
        name: impl Into<String>,
        system_prompt_id: TextAssetId,
        conversation_id: ConversationId,
        model: impl Into<String>,
        model_config: ModelConfig,
        metadata: JsonMap<String, JsonValue>,
    ) -> Self {
        Self {
            id: AgentId::generate(),
            created_at: now(),
            name: name.into(),
            system_prompt_id,
            parent_id: None,
            conversation_id,
            model: model.into(),
            model_config,
            metadata,
        }
    }

    /// Create the next version of this agent over a new conversation
    /// snapshot. The child links back here via `parent_id`.
    pub fn evolve(&self, conversation_id: ConversationId) -> Self {
        Self {
            id: AgentId::generate(),
            created_at: now(),
            name: self.name.clone(),
            system_prompt_id: self.system_prompt_id,
            parent_id: Some(self.id),
            conversation_id,
            model: self.model.clone(),
            model_config: self.model_config.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Create a sibling: a fresh version sharing this one's parent and
    /// conversation, so both can advance in different directions.
    pub fn sibling(&self, name: Option<String>) -> Self {
        Self {
            id: AgentId::generate(),
            created_at: now(),
            name: name.unwrap_or_else(|| self.name.clone()),
            system_prompt_id: self.system_prompt_id,
            parent_id: self.parent_id,
            conversation_id: self.conversation_id,
            model: self.model.clone(),
            model_config: self.model_config.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
