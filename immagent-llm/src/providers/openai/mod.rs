//! OpenAI completion provider implementation

mod client;
mod types;

pub use client::OpenAIClient;

use crate::providers::invalid_response;
use crate::{Completion, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use immagent_core::{LlmError, Message, Role, ToolCall};
use types::{ApiMessage, ApiToolCall, ChatRequest, ChatResponse, FunctionSpec, ToolSpec};

/// Completion provider backed by the OpenAI Chat Completions API.
pub struct OpenAICompletionProvider {
    client: OpenAIClient,
}

impl OpenAICompletionProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: OpenAIClient::new(api_key, 60),
        }
    }

    pub fn with_client(client: OpenAIClient) -> Self {
        Self { client }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut api_messages = Vec::with_capacity(request.messages.len() + 1);
        api_messages.push(ApiMessage {
            role: "system".to_string(),
            content: Some(request.system.clone()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
        for message in &request.messages {
            api_messages.push(to_api_message(message));
        }

        let tools = request
            .tools
            .iter()
            .map(|t| ToolSpec {
                kind: "function".to_string(),
                function: FunctionSpec {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect();

        let config = &request.config;
        ChatRequest {
            model: request.model.clone(),
            messages: api_messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            stop: config.stop.clone(),
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            tools,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletionProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = self.build_request(request);
        let response: ChatResponse = self.client.request("chat/completions", &body).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("openai", "Response contained no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(Completion {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            input_tokens: response.usage.as_ref().map(|u| u.prompt_tokens as i32),
            output_tokens: response.usage.as_ref().map(|u| u.completion_tokens as i32),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Convert a stored message into the Chat Completions wire shape. The raw
/// argument strings ride along untouched in both directions.
fn to_api_message(message: &Message) -> ApiMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    ApiMessage {
        role: role.to_string(),
        content: message.content.clone(),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|tc| ApiToolCall {
                id: tc.id.clone(),
                kind: "function".to_string(),
                function: types::ApiFunctionCall {
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                },
            })
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}
