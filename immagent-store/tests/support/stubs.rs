//! Scripted completion and tool providers for end-to-end tests.
#![allow(dead_code)]

use async_trait::async_trait;
use immagent_core::{LlmError, ToolCall, ToolError};
use immagent_llm::{Completion, CompletionProvider, CompletionRequest, ToolDef, ToolProvider};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Completion provider that replays a fixed script and records every
/// request it sees.
pub struct ScriptedCompletions {
    script: Mutex<VecDeque<Completion>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletions {
    pub fn new(script: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// All requests observed so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletions {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidRequest {
                provider: "scripted".to_string(),
                reason: "script exhausted".to_string(),
            })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Completion provider that requests a tool on every call, forever.
pub struct AlwaysToolCalls {
    counter: AtomicU32,
}

impl AlwaysToolCalls {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CompletionProvider for AlwaysToolCalls {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("c{}", n),
                name: "clock".to_string(),
                arguments: "{}".to_string(),
            }],
            input_tokens: None,
            output_tokens: None,
        })
    }

    fn name(&self) -> &str {
        "always-tools"
    }
}

/// Tool provider answering from a fixed table, with optional per-tool
/// delays (to exercise completion-order vs request-order) and failures.
#[derive(Default)]
pub struct TableTools {
    responses: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    failing: HashMap<String, String>,
}

impl TableTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: &str, response: &str) -> Self {
        self.responses.insert(name.to_string(), response.to_string());
        self
    }

    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn with_failure(mut self, name: &str, reason: &str) -> Self {
        self.failing.insert(name.to_string(), reason.to_string());
        self
    }
}

#[async_trait]
impl ToolProvider for TableTools {
    async fn list_tools(&self) -> Result<Vec<ToolDef>, ToolError> {
        let mut names: Vec<&String> = self.responses.keys().chain(self.failing.keys()).collect();
        names.sort();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|name| ToolDef {
                name: name.clone(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            })
            .collect())
    }

    async fn execute(&self, name: &str, _arguments: &str) -> Result<String, ToolError> {
        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(reason) = self.failing.get(name) {
            return Err(ToolError::ExecutionFailed {
                tool: name.to_string(),
                reason: reason.clone(),
            });
        }
        self.responses
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })
    }
}

/// Shorthand for a plain-text completion.
pub fn text(content: &str) -> Completion {
    Completion {
        content: Some(content.to_string()),
        tool_calls: Vec::new(),
        input_tokens: Some(7),
        output_tokens: Some(3),
    }
}

/// Shorthand for a completion requesting the given tool calls.
pub fn tool_round(calls: &[(&str, &str, &str)]) -> Completion {
    Completion {
        content: None,
        tool_calls: calls
            .iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            })
            .collect(),
        input_tokens: None,
        output_tokens: None,
    }
}
