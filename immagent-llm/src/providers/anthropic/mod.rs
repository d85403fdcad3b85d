//! Anthropic (Claude) completion provider implementation

mod client;
mod types;

pub use client::AnthropicClient;

use crate::providers::invalid_response;
use crate::{Completion, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use immagent_core::{LlmError, Message, Role, ToolCall};
use types::{ApiMessage, ContentBlock, MessageRequest, MessageResponse, ToolSpec};

/// Max tokens sent when the agent's config leaves it unset; the Messages
/// API requires an explicit value.
const DEFAULT_MAX_TOKENS: i32 = 4096;

/// Completion provider backed by the Anthropic Messages API.
pub struct AnthropicCompletionProvider {
    client: AnthropicClient,
}

impl AnthropicCompletionProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: AnthropicClient::new(api_key, 50),
        }
    }

    pub fn with_client(client: AnthropicClient) -> Self {
        Self { client }
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<MessageRequest, LlmError> {
        let mut api_messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            api_messages.push(to_api_message(message)?);
        }

        let tools = request
            .tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();

        let config = &request.config;
        Ok(MessageRequest {
            model: request.model.clone(),
            messages: api_messages,
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: (!request.system.is_empty()).then(|| request.system.clone()),
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            stop_sequences: config.stop.clone(),
            tools,
        })
    }
}

#[async_trait]
impl CompletionProvider for AnthropicCompletionProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = self.build_request(request)?;
        let response: MessageResponse = self.client.request("messages", &body).await?;

        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::ToolUse { id, name, input } => {
                    let arguments = serde_json::to_string(&input).map_err(|e| {
                        invalid_response("anthropic", format!("Unserializable tool input: {}", e))
                    })?;
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments,
                    });
                }
                ContentBlock::ToolResult { .. } => {
                    return Err(invalid_response(
                        "anthropic",
                        "Unexpected tool_result block in assistant response",
                    ));
                }
            }
        }

        let content = (!text_parts.is_empty()).then(|| text_parts.join("\n"));
        Ok(Completion {
            content,
            tool_calls,
            input_tokens: Some(response.usage.input_tokens as i32),
            output_tokens: Some(response.usage.output_tokens as i32),
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Convert a stored message into the Messages API wire shape.
///
/// Tool-result messages travel as `user` turns carrying a `tool_result`
/// block; assistant tool requests become `tool_use` blocks with their raw
/// argument strings re-parsed into JSON input objects.
fn to_api_message(message: &Message) -> Result<ApiMessage, LlmError> {
    match message.role {
        Role::User | Role::System => Ok(ApiMessage {
            role: "user".to_string(),
            content: vec![ContentBlock::Text {
                text: message.content.clone().unwrap_or_default(),
            }],
        }),
        Role::Assistant => {
            let mut content = Vec::new();
            if let Some(text) = &message.content {
                if !text.is_empty() {
                    content.push(ContentBlock::Text { text: text.clone() });
                }
            }
            for tc in &message.tool_calls {
                let input = serde_json::from_str(&tc.arguments).map_err(|e| {
                    LlmError::InvalidRequest {
                        provider: "anthropic".to_string(),
                        reason: format!("Tool call '{}' has unparseable arguments: {}", tc.id, e),
                    }
                })?;
                content.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input,
                });
            }
            Ok(ApiMessage {
                role: "assistant".to_string(),
                content,
            })
        }
        Role::Tool => {
            let tool_use_id =
                message
                    .tool_call_id
                    .clone()
                    .ok_or_else(|| LlmError::InvalidRequest {
                        provider: "anthropic".to_string(),
                        reason: "Tool message without tool_call_id".to_string(),
                    })?;
            Ok(ApiMessage {
                role: "user".to_string(),
                content: vec![ContentBlock::ToolResult {
                    tool_use_id,
                    content: message.content.clone().unwrap_or_default(),
                }],
            })
        }
    }
}
