//! ImmAgent LLM - Provider Seams
//!
//! Provider-agnostic traits for chat completion and tool execution, a
//! retry-with-timeout adapter around completion calls, and a composite
//! tool router. Concrete Anthropic/OpenAI providers live in `providers`.

use async_trait::async_trait;
use immagent_core::{LlmError, Message, ModelConfig, RetryConfig, ToolCall, ToolError};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod providers;

pub use providers::ProviderRouter;

// ============================================================================
// COMPLETION PROVIDER
// ============================================================================

/// A tool definition advertised to the model.
///
/// `parameters` is a JSON Schema object in the providers' shared function
/// format.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

/// One completion call: the full context the provider needs.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Opaque routing string; routers may strip their prefix before
    /// forwarding (e.g. "anthropic/claude-3-5-haiku" -> "claude-3-5-haiku").
    pub model: String,
    pub system: String,
    pub messages: Vec<Arc<Message>>,
    pub tools: Vec<ToolDef>,
    pub config: ModelConfig,
}

/// What a provider returns for one completion call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
}

/// Trait for chat completion providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform one completion call. Implementations do not retry; the
    /// adapter below owns the retry and timeout policy.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;

    /// Provider name used in error payloads and logs.
    fn name(&self) -> &str;
}

/// Run one completion with a per-attempt timeout and exponential backoff
/// on transient failures.
///
/// Transient failures (transport errors, rate limits, timeouts, 5xx) are
/// retried up to `retry.max_retries` times; everything else surfaces
/// immediately.
pub async fn complete_with_retry(
    provider: &dyn CompletionProvider,
    request: &CompletionRequest,
    timeout: Duration,
    retry: &RetryConfig,
) -> Result<Completion, LlmError> {
    let mut attempt: u32 = 0;
    loop {
        let outcome = tokio::time::timeout(timeout, provider.complete(request)).await;
        let err = match outcome {
            Ok(Ok(completion)) => return Ok(completion),
            Ok(Err(err)) => err,
            Err(_) => LlmError::Timeout {
                provider: provider.name().to_string(),
                seconds: timeout.as_secs(),
            },
        };

        if !err.is_transient() || attempt >= retry.max_retries {
            return Err(err);
        }

        let backoff = retry.backoff_for(attempt);
        tracing::warn!(
            provider = provider.name(),
            model = %request.model,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Retrying completion after transient failure"
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

// ============================================================================
// TOOL PROVIDER
// ============================================================================

/// Trait for tool execution providers (an MCP server connection, an
/// in-process registry, ...).
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// List the tools this provider can execute.
    async fn list_tools(&self) -> Result<Vec<ToolDef>, ToolError>;

    /// Execute a tool. `arguments` is the model's raw JSON string, passed
    /// through verbatim.
    async fn execute(&self, name: &str, arguments: &str) -> Result<String, ToolError>;
}

/// Composite tool provider dispatching by tool name across several
/// registered providers.
///
/// Tools are indexed at registration time; the first provider to register
/// a name wins.
#[derive(Default)]
pub struct ToolRouter {
    providers: Vec<Arc<dyn ToolProvider>>,
    by_name: HashMap<String, usize>,
    tools: Vec<ToolDef>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, discovering and indexing its tools.
    pub async fn register(&mut self, provider: Arc<dyn ToolProvider>) -> Result<(), ToolError> {
        let tools = provider.list_tools().await?;
        let index = self.providers.len();
        self.providers.push(provider);
        for tool in tools {
            if self.by_name.contains_key(&tool.name) {
                tracing::debug!(tool = %tool.name, "Skipping already-registered tool");
                continue;
            }
            self.by_name.insert(tool.name.clone(), index);
            self.tools.push(tool);
        }
        Ok(())
    }

    /// Number of distinct tools currently registered.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for ToolRouter {
    async fn list_tools(&self) -> Result<Vec<ToolDef>, ToolError> {
        Ok(self.tools.clone())
    }

    async fn execute(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let index = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?;
        self.providers[index].execute(name, arguments).await
    }
}
