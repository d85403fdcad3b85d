//! The advance engine: one turn of the agent loop.
//!
//! A turn reconstructs the agent's history, appends the user message,
//! drives the completion provider through bounded tool rounds, and emits a
//! new agent version whose conversation snapshot extends the old one. The
//! input agent is untouched; nothing is persisted until the whole bundle
//! is assembled, and the bundle lands in a single transaction.

use crate::cache::Asset;
use crate::store::Store;
use immagent_core::{
    AgentVersion, ImmAgentResult, Message, ModelConfig, NotFoundError, RetryConfig,
    ValidateNonEmpty, ValidationError,
};
use immagent_llm::{complete_with_retry, CompletionRequest, ToolDef, ToolProvider};
use std::sync::Arc;
use std::time::Duration;

/// Options for one `advance` call.
#[derive(Clone)]
pub struct AdvanceOptions {
    /// Retry attempts for transient completion failures.
    pub max_retries: u32,
    /// Per-attempt completion timeout.
    pub timeout: Duration,
    /// Safety cap on LLM/tool round trips within the turn.
    pub max_tool_rounds: usize,
    /// Tool executor; without one, a tool-requesting completion ends the
    /// turn.
    pub tools: Option<Arc<dyn ToolProvider>>,
    /// Per-call knobs shallow-merged over the agent's `model_config`.
    pub overrides: ModelConfig,
}

impl Default for AdvanceOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(120),
            max_tool_rounds: 10,
            tools: None,
            overrides: ModelConfig::default(),
        }
    }
}

pub(crate) async fn advance(
    store: &Store,
    agent: &AgentVersion,
    user_input: &str,
    options: AdvanceOptions,
) -> ImmAgentResult<Arc<AgentVersion>> {
    // Validate before any I/O.
    user_input.validate_non_empty("user_input")?;
    if options.max_tool_rounds < 1 {
        return Err(ValidationError::InvalidValue {
            field: "max_tool_rounds".to_string(),
            reason: "must be at least 1".to_string(),
        }
        .into());
    }
    if options.timeout.is_zero() {
        return Err(ValidationError::InvalidValue {
            field: "timeout".to_string(),
            reason: "must be positive".to_string(),
        }
        .into());
    }

    tracing::info!(
        agent_id = %agent.id,
        name = %agent.name,
        model = %agent.model,
        "Advancing agent"
    );

    // History reconstruction.
    let conversation = store
        .get_conversation(agent.conversation_id)
        .await?
        .ok_or(NotFoundError::Conversation(agent.conversation_id))?;
    let system_prompt = store
        .get_text(agent.system_prompt_id)
        .await?
        .ok_or(NotFoundError::SystemPrompt(agent.system_prompt_id))?;
    let mut working = store.resolve_messages(&conversation.message_ids).await?;
    tracing::debug!(count = working.len(), "Loaded existing messages");

    // The user turn.
    let user_message = Arc::new(Message::user(user_input));
    working.push(Arc::clone(&user_message));
    let mut new_messages: Vec<Arc<Message>> = vec![user_message];

    let tool_defs: Vec<ToolDef> = match &options.tools {
        Some(provider) => provider.list_tools().await?,
        None => Vec::new(),
    };

    let effective_config = agent.model_config.merged(&options.overrides);
    let retry = RetryConfig::with_max_retries(options.max_retries);
    let completions = store.completions();

    // Round loop: one completion per round, then any requested tools.
    let mut llm_calls = 0u32;
    for _ in 0..options.max_tool_rounds {
        let request = CompletionRequest {
            model: agent.model.clone(),
            system: system_prompt.content.clone(),
            messages: working.clone(),
            tools: tool_defs.clone(),
            config: effective_config.clone(),
        };
        let completion =
            complete_with_retry(completions.as_ref(), &request, options.timeout, &retry).await?;
        llm_calls += 1;

        let assistant = Arc::new(Message::assistant(
            completion.content,
            completion.tool_calls,
            completion.input_tokens,
            completion.output_tokens,
        ));
        working.push(Arc::clone(&assistant));
        new_messages.push(Arc::clone(&assistant));

        let Some(tool_provider) = options.tools.as_ref().filter(|_| !assistant.tool_calls.is_empty())
        else {
            break;
        };

        // Dispatch the round's calls concurrently; collect results in
        // request order regardless of completion order. A failed call
        // becomes an error string for the model, never an error for the
        // caller.
        let executions = assistant.tool_calls.iter().map(|call| {
            let provider = Arc::clone(tool_provider);
            async move {
                match provider.execute(&call.name, &call.arguments).await {
                    Ok(result) => result,
                    Err(err) => format!("Error: {}", err),
                }
            }
        });
        let results = futures::future::join_all(executions).await;

        for (call, result) in assistant.tool_calls.iter().zip(results) {
            let tool_message = Arc::new(Message::tool_result(call.id.clone(), result));
            working.push(Arc::clone(&tool_message));
            new_messages.push(tool_message);
        }
    }

    // Emission: conversation snapshot, then the next agent version.
    let new_ids: Vec<_> = new_messages.iter().map(|m| m.id).collect();
    let new_conversation = Arc::new(conversation.with_messages(&new_ids));
    let new_agent = Arc::new(agent.evolve(new_conversation.id));

    // Cache in dependency order so save() can assemble the bundle.
    for message in &new_messages {
        store.cache().put(Asset::Message(Arc::clone(message)));
    }
    store
        .cache()
        .put(Asset::Conversation(Arc::clone(&new_conversation)));
    store.cache().put(Asset::Agent(Arc::clone(&new_agent)));

    store.save(&new_agent).await?;

    tracing::info!(
        old_id = %agent.id,
        new_id = %new_agent.id,
        llm_calls,
        new_messages = new_messages.len(),
        "Agent advanced"
    );

    Ok(new_agent)
}
