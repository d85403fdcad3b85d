//! End-to-end turn-loop tests against the in-memory backend.
//!
//! Completions are scripted, tools answer from a table, so every scenario
//! is deterministic and runs without a database.

use immagent_core::{ImmAgentError, ModelConfig, Role};
use immagent_store::{AdvanceOptions, Store};
use std::sync::Arc;
use std::time::Duration;

#[path = "support/stubs.rs"]
mod stubs;
use stubs::{text, tool_round, AlwaysToolCalls, ScriptedCompletions, TableTools};

const MODEL: &str = "anthropic/claude-3-5-haiku";

fn scripted_store(script: Vec<immagent_llm::Completion>) -> (Store, Arc<ScriptedCompletions>) {
    let provider = Arc::new(ScriptedCompletions::new(script));
    let store = Store::in_memory().with_completions(provider.clone());
    (store, provider)
}

async fn fresh_agent(store: &Store) -> Arc<immagent_core::AgentVersion> {
    store
        .create_agent("TestBot", "You are helpful.", MODEL, None, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn create_and_advance_without_tools() {
    let (store, _) = scripted_store(vec![text("pong")]);
    let a0 = fresh_agent(&store).await;
    assert!(a0.parent_id.is_none());

    let a1 = store
        .advance(&a0, "ping", AdvanceOptions::default())
        .await
        .unwrap();

    assert_ne!(a1.id, a0.id);
    assert_eq!(a1.parent_id, Some(a0.id));
    assert_eq!(a1.name, a0.name);

    let messages = store.get_messages(&a1).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content.as_deref(), Some("ping"));
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content.as_deref(), Some("pong"));
    assert_eq!(messages[1].input_tokens, Some(7));
    assert_eq!(messages[1].output_tokens, Some(3));

    // Reloading by id hands back the same canonical version.
    let reloaded = store.load_agent(a1.id).await.unwrap();
    assert_eq!(*reloaded, *a1);
}

#[tokio::test]
async fn tool_round_appends_result_then_final_answer() {
    let (store, provider) = scripted_store(vec![
        tool_round(&[("c1", "clock", "{}")]),
        text("12:00"),
    ]);
    let tools = Arc::new(TableTools::new().with_tool("clock", "12:00 UTC"));
    let a0 = fresh_agent(&store).await;

    let a1 = store
        .advance(
            &a0,
            "what time is it?",
            AdvanceOptions {
                tools: Some(tools),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let messages = store.get_messages(&a1).await.unwrap();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(messages[1].tool_calls[0].id, "c1");
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(messages[2].content.as_deref(), Some("12:00 UTC"));
    assert_eq!(messages[3].content.as_deref(), Some("12:00"));

    // The second completion call saw the tool result in its history.
    let second_request = &provider.requests()[1];
    assert_eq!(second_request.messages.len(), 3);
    assert_eq!(second_request.messages[2].role, Role::Tool);
}

#[tokio::test]
async fn concurrent_tool_calls_preserve_request_order() {
    let (store, _) = scripted_store(vec![
        tool_round(&[("c1", "slow", "{}"), ("c2", "fast", "{}")]),
        text("done"),
    ]);
    let tools = Arc::new(
        TableTools::new()
            .with_tool("slow", "slow-result")
            .with_delay("slow", Duration::from_millis(50))
            .with_tool("fast", "fast-result"),
    );
    let a0 = fresh_agent(&store).await;

    let a1 = store
        .advance(
            &a0,
            "race",
            AdvanceOptions {
                tools: Some(tools),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let messages = store.get_messages(&a1).await.unwrap();
    // c1 finishes last but its result still comes first.
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(messages[2].content.as_deref(), Some("slow-result"));
    assert_eq!(messages[3].tool_call_id.as_deref(), Some("c2"));
    assert_eq!(messages[3].content.as_deref(), Some("fast-result"));
}

#[tokio::test]
async fn bounded_tool_rounds_terminate_cleanly() {
    let provider = Arc::new(AlwaysToolCalls::new());
    let store = Store::in_memory().with_completions(provider);
    let tools = Arc::new(TableTools::new().with_tool("clock", "tick"));
    let a0 = fresh_agent(&store).await;

    let a1 = store
        .advance(
            &a0,
            "loop forever",
            AdvanceOptions {
                max_tool_rounds: 3,
                tools: Some(tools),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let messages = store.get_messages(&a1).await.unwrap();
    // user + 3 * (assistant + tool result), no error raised.
    assert_eq!(messages.len(), 7);
    let last_assistant = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    assert!(!last_assistant.tool_calls.is_empty());
}

#[tokio::test]
async fn tool_calls_without_provider_end_the_turn() {
    let (store, _) = scripted_store(vec![tool_round(&[("c1", "clock", "{}")]), text("unused")]);
    let a0 = fresh_agent(&store).await;

    let a1 = store
        .advance(&a0, "hi", AdvanceOptions::default())
        .await
        .unwrap();

    let messages = store.get_messages(&a1).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!messages[1].tool_calls.is_empty());
}

#[tokio::test]
async fn failed_tool_becomes_error_text() {
    let (store, _) = scripted_store(vec![
        tool_round(&[("c1", "boom", "{}")]),
        text("recovered"),
    ]);
    let tools = Arc::new(TableTools::new().with_failure("boom", "exploded"));
    let a0 = fresh_agent(&store).await;

    let a1 = store
        .advance(
            &a0,
            "try it",
            AdvanceOptions {
                tools: Some(tools),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let messages = store.get_messages(&a1).await.unwrap();
    assert_eq!(
        messages[2].content.as_deref(),
        Some("Error: Tool 'boom' failed: exploded")
    );
    assert_eq!(messages[3].content.as_deref(), Some("recovered"));
}

#[tokio::test]
async fn conversation_snapshots_preserve_prefix() {
    let (store, _) = scripted_store(vec![text("one"), text("two")]);
    let a0 = fresh_agent(&store).await;
    let a1 = store
        .advance(&a0, "first", AdvanceOptions::default())
        .await
        .unwrap();
    let a2 = store
        .advance(&a1, "second", AdvanceOptions::default())
        .await
        .unwrap();

    let c1 = store.get_conversation(a1.conversation_id).await.unwrap().unwrap();
    let c2 = store.get_conversation(a2.conversation_id).await.unwrap().unwrap();

    assert_ne!(c1.id, c2.id);
    assert_eq!(&c2.message_ids[..c1.message_ids.len()], &c1.message_ids[..]);
    assert_eq!(c2.message_ids.len(), c1.message_ids.len() + 2);
}

#[tokio::test]
async fn per_call_overrides_shallow_merge_over_agent_config() {
    let (store, provider) = scripted_store(vec![text("ok")]);
    let config = ModelConfig {
        temperature: Some(0.7),
        max_tokens: Some(100),
        ..Default::default()
    };
    let agent = store
        .create_agent("Tuned", "You are helpful.", MODEL, Some(config), None)
        .await
        .unwrap();

    store
        .advance(
            &agent,
            "hello",
            AdvanceOptions {
                overrides: ModelConfig {
                    temperature: Some(0.2),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let request = &provider.requests()[0];
    assert_eq!(request.model, MODEL);
    assert_eq!(request.system, "You are helpful.");
    assert_eq!(request.config.temperature, Some(0.2));
    assert_eq!(request.config.max_tokens, Some(100));
}

#[tokio::test]
async fn sibling_clone_branches_without_touching_original() {
    let (store, _) = scripted_store(vec![text("rx"), text("ry1"), text("ry2")]);
    let a0 = fresh_agent(&store).await;
    let a1 = store
        .advance(&a0, "x", AdvanceOptions::default())
        .await
        .unwrap();

    let twin = store.clone_agent(&a1, None).await.unwrap();
    assert_ne!(twin.id, a1.id);
    assert_eq!(twin.parent_id, Some(a0.id));
    assert_eq!(twin.parent_id, a1.parent_id);
    assert_eq!(twin.conversation_id, a1.conversation_id);

    let b1 = store
        .advance(&a1, "y1", AdvanceOptions::default())
        .await
        .unwrap();
    let b2 = store
        .advance(&twin, "y2", AdvanceOptions::default())
        .await
        .unwrap();

    assert_eq!(b1.parent_id, Some(a1.id));
    assert_eq!(b2.parent_id, Some(twin.id));
    assert_ne!(b1.conversation_id, b2.conversation_id);

    // The shared history diverges only after the branch point.
    let m1 = store.get_messages(&b1).await.unwrap();
    let m2 = store.get_messages(&b2).await.unwrap();
    assert_eq!(m1[1].content.as_deref(), Some("rx"));
    assert_eq!(m2[1].content.as_deref(), Some("rx"));
    assert_eq!(m1[3].content.as_deref(), Some("ry1"));
    assert_eq!(m2[3].content.as_deref(), Some("ry2"));

    // a1 itself is untouched.
    assert_eq!(store.get_messages(&a1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn with_update_emits_a_child() {
    let (store, _) = scripted_store(vec![]);
    let a0 = fresh_agent(&store).await;

    let child = store
        .with_update(
            &a0,
            immagent_store::AgentUpdate {
                name: Some("TestBot v2".into()),
                model: Some("openai/gpt-4o".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(child.parent_id, Some(a0.id));
    assert_eq!(child.conversation_id, a0.conversation_id);
    assert_eq!(child.name, "TestBot v2");
    assert_eq!(child.model, "openai/gpt-4o");
    assert_eq!(child.system_prompt_id, a0.system_prompt_id);

    let mut metadata = serde_json::Map::new();
    metadata.insert("stage".to_string(), serde_json::json!("prod"));
    let annotated = store.with_metadata(&child, metadata.clone()).await.unwrap();
    assert_eq!(annotated.parent_id, Some(child.id));
    assert_eq!(annotated.metadata, metadata);
    assert_eq!(annotated.name, child.name);
}

#[tokio::test]
async fn lineage_walks_root_first() {
    let (store, _) = scripted_store(vec![text("one"), text("two")]);
    let a0 = fresh_agent(&store).await;
    let a1 = store
        .advance(&a0, "first", AdvanceOptions::default())
        .await
        .unwrap();
    let a2 = store
        .advance(&a1, "second", AdvanceOptions::default())
        .await
        .unwrap();

    let lineage = store.get_lineage(&a2).await.unwrap();
    let ids: Vec<_> = lineage.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![a0.id, a1.id, a2.id]);

    // Lineage idempotence: walking from the last element is the same walk.
    let again = store.get_lineage(lineage.last().unwrap()).await.unwrap();
    let again_ids: Vec<_> = again.iter().map(|a| a.id).collect();
    assert_eq!(again_ids, ids);
}

#[tokio::test]
async fn cache_returns_canonical_instances() {
    let (store, _) = scripted_store(vec![text("pong")]);
    let a0 = fresh_agent(&store).await;
    let a1 = store
        .advance(&a0, "ping", AdvanceOptions::default())
        .await
        .unwrap();

    let first = store.get_messages(&a1).await.unwrap();
    let second = store.get_messages(&a1).await.unwrap();
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(Arc::ptr_eq(a, b));
    }

    let reloaded = store.load_agent(a1.id).await.unwrap();
    assert!(Arc::ptr_eq(&reloaded, &a1));
}

#[tokio::test]
async fn delete_then_gc_on_memory_store() {
    let (store, _) = scripted_store(vec![]);
    let a0 = fresh_agent(&store).await;

    assert!(store.delete_agent(a0.id).await.unwrap());
    let err = store.load_agent(a0.id).await.unwrap_err();
    assert!(matches!(err, ImmAgentError::NotFound(_)));

    // Nothing to sweep without a database.
    let report = store.gc().await.unwrap();
    assert_eq!(report.messages, 0);
    assert_eq!(report.conversations, 0);
    assert_eq!(report.text_assets, 0);
}

#[tokio::test]
async fn list_and_count_filter_by_name() {
    let (store, _) = scripted_store(vec![]);
    store
        .create_agent("Support Bot", "You are helpful.", MODEL, None, None)
        .await
        .unwrap();
    store
        .create_agent("Sales Bot", "You are helpful.", MODEL, None, None)
        .await
        .unwrap();
    store
        .create_agent("support bot", "You are helpful.", MODEL, None, None)
        .await
        .unwrap();

    // Case-insensitive substring filter.
    assert_eq!(store.count_agents(Some("support")).await.unwrap(), 2);
    assert_eq!(store.count_agents(None).await.unwrap(), 3);
    let listed = store.list_agents(10, 0, Some("bot")).await.unwrap();
    assert_eq!(listed.len(), 3);
    // Newest first.
    assert!(listed.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    // Exact match is case-sensitive.
    let exact = store.find_by_name("support bot").await.unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].name, "support bot");
}

#[tokio::test]
async fn validation_rejects_bad_inputs_before_io() {
    let (store, provider) = scripted_store(vec![]);
    let a0 = fresh_agent(&store).await;

    let err = store
        .advance(&a0, "   ", AdvanceOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ImmAgentError::Validation(_)));

    let err = store
        .advance(
            &a0,
            "hi",
            AdvanceOptions {
                max_tool_rounds: 0,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ImmAgentError::Validation(_)));

    let err = store
        .advance(
            &a0,
            "hi",
            AdvanceOptions {
                timeout: Duration::ZERO,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ImmAgentError::Validation(_)));

    // No completion call was ever made.
    assert!(provider.requests().is_empty());

    for (name, prompt, model) in [
        ("", "You are helpful.", MODEL),
        ("Bot", "  ", MODEL),
        ("Bot", "You are helpful.", ""),
    ] {
        let err = store
            .create_agent(name, prompt, model, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ImmAgentError::Validation(_)));
    }
}
