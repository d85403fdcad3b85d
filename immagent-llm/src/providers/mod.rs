//! Completion provider implementations
//!
//! Concrete `CompletionProvider` impls for hosted LLM services, plus the
//! `ProviderRouter` that picks one from the model string's prefix.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicCompletionProvider;
pub use openai::OpenAICompletionProvider;

use crate::{Completion, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use immagent_core::LlmError;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn transport_error(provider: &str, message: impl Into<String>) -> LlmError {
    LlmError::Transport {
        provider: provider.to_string(),
        message: message.into(),
    }
}

pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> LlmError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// PROVIDER ROUTER
// ============================================================================

/// Routes completion calls by the `provider/` prefix of the model string
/// (`"anthropic/claude-3-5-haiku"`, `"openai/gpt-4o"`). The prefix is
/// stripped before the call reaches the provider.
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn CompletionProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a router from the conventional environment variables,
    /// registering each hosted provider whose API key is present.
    /// `ANTHROPIC_API_KEY` and `OPENAI_API_KEY` are consulted.
    pub fn from_env() -> Self {
        let mut router = Self::new();
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            router.register("anthropic", Arc::new(AnthropicCompletionProvider::new(key)));
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            router.register("openai", Arc::new(OpenAICompletionProvider::new(key)));
        }
        router
    }

    /// Register a provider under a model-string prefix.
    pub fn register(&mut self, prefix: impl Into<String>, provider: Arc<dyn CompletionProvider>) {
        self.providers.insert(prefix.into(), provider);
    }

    fn route<'a>(&self, model: &'a str) -> Result<(&Arc<dyn CompletionProvider>, &'a str), LlmError> {
        let (prefix, rest) = model.split_once('/').ok_or_else(|| {
            LlmError::ProviderNotConfigured {
                model: model.to_string(),
            }
        })?;
        let provider = self
            .providers
            .get(prefix)
            .ok_or_else(|| LlmError::ProviderNotConfigured {
                model: model.to_string(),
            })?;
        Ok((provider, rest))
    }
}

#[async_trait]
impl CompletionProvider for ProviderRouter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let (provider, model) = self.route(&request.model)?;
        let mut routed = request.clone();
        routed.model = model.to_string();
        provider.complete(&routed).await
    }

    fn name(&self) -> &str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use immagent_core::ModelConfig;

    struct Recorder;

    #[async_trait]
    impl CompletionProvider for Recorder {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            Ok(Completion {
                content: Some(request.model.clone()),
                ..Default::default()
            })
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.into(),
            system: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            config: ModelConfig::default(),
        }
    }

    #[tokio::test]
    async fn strips_prefix_before_forwarding() {
        let mut router = ProviderRouter::new();
        router.register("anthropic", Arc::new(Recorder));
        let completion = router
            .complete(&request("anthropic/claude-3-5-haiku"))
            .await
            .unwrap();
        assert_eq!(completion.content.as_deref(), Some("claude-3-5-haiku"));
    }

    #[tokio::test]
    async fn unknown_prefix_is_not_configured() {
        let router = ProviderRouter::new();
        let err = router.complete(&request("mistral/large")).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderNotConfigured { .. }));

        let err = router.complete(&request("no-prefix")).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderNotConfigured { .. }));
    }
}
