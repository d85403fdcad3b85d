#![cfg(feature = "db-tests")]
//! Round-trip tests against a live PostgreSQL.
//!
//! Requires `DATABASE_URL` to point at a database the tests may write to.
//! Run with `cargo test -p immagent-store --features db-tests`.
//!
//! Tests key their rows by fresh UUIDs, so they tolerate a shared
//! database and parallel execution.

use immagent_core::AssetIdType;
use immagent_store::{AdvanceOptions, PoolOptions, Store};
use std::sync::Arc;
use uuid::Uuid;

#[path = "support/stubs.rs"]
mod stubs;
use stubs::{text, tool_round, ScriptedCompletions, TableTools};

const MODEL: &str = "anthropic/claude-3-5-haiku";

async fn connect(script: Vec<immagent_llm::Completion>) -> Store {
    let dsn = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for db-tests");
    let store = Store::connect(&dsn, PoolOptions::default())
        .await
        .expect("failed to connect")
        .with_completions(Arc::new(ScriptedCompletions::new(script)));
    store.init_schema().await.expect("failed to init schema");
    store
}

#[tokio::test]
async fn saved_bundle_reloads_equal_in_every_field() {
    let store = connect(vec![
        tool_round(&[("c1", "clock", "{\"city\":  \"Oslo\", \"n\": 1}")]),
        text("12:00"),
    ])
    .await;
    let tools = Arc::new(TableTools::new().with_tool("clock", "12:00 UTC"));

    let mut metadata = serde_json::Map::new();
    metadata.insert("team".to_string(), serde_json::json!("qa"));
    let config = immagent_core::ModelConfig {
        temperature: Some(0.7),
        max_tokens: Some(256),
        ..Default::default()
    };
    let a0 = store
        .create_agent(
            &format!("roundtrip-{}", Uuid::new_v4()),
            "You are helpful.",
            MODEL,
            Some(config),
            Some(metadata),
        )
        .await
        .unwrap();

    let a1 = store
        .advance(
            &a0,
            "what time is it in Oslo?",
            AdvanceOptions {
                tools: Some(tools),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let original_messages = store.get_messages(&a1).await.unwrap();

    // Drop every cached instance so the reload hits the database.
    store.clear_cache();

    let reloaded = store.load_agent(a1.id).await.unwrap();
    assert_eq!(*reloaded, *a1);

    let reloaded_messages = store.get_messages(&reloaded).await.unwrap();
    assert_eq!(reloaded_messages.len(), original_messages.len());
    for (reloaded, original) in reloaded_messages.iter().zip(original_messages.iter()) {
        assert_eq!(**reloaded, **original);
    }

    // The raw tool-call argument string survives byte-for-byte.
    assert_eq!(
        reloaded_messages[1].tool_calls[0].arguments,
        "{\"city\":  \"Oslo\", \"n\": 1}"
    );

    // Re-saving an existing bundle is a no-op, not a conflict.
    store.save(&reloaded).await.unwrap();

    store.close();
}

#[tokio::test]
async fn lineage_resolves_in_one_recursive_query() {
    let store = connect(vec![text("one"), text("two")]).await;
    let a0 = store
        .create_agent(
            &format!("lineage-{}", Uuid::new_v4()),
            "You are helpful.",
            MODEL,
            None,
            None,
        )
        .await
        .unwrap();
    let a1 = store
        .advance(&a0, "first", AdvanceOptions::default())
        .await
        .unwrap();
    let a2 = store
        .advance(&a1, "second", AdvanceOptions::default())
        .await
        .unwrap();

    store.clear_cache();
    let a2 = store.load_agent(a2.id).await.unwrap();

    let lineage = store.get_lineage(&a2).await.unwrap();
    let ids: Vec<_> = lineage.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![a0.id, a1.id, a2.id]);

    // The walked versions are cached: a second walk reuses the instances.
    let again = store.get_lineage(&a2).await.unwrap();
    for (a, b) in lineage.iter().zip(again.iter()) {
        assert!(Arc::ptr_eq(a, b));
    }

    store.close();
}

#[tokio::test]
async fn deleting_a_parent_reparents_children_to_null() {
    let store = connect(vec![text("one"), text("two")]).await;
    let a0 = store
        .create_agent(
            &format!("setnull-{}", Uuid::new_v4()),
            "You are helpful.",
            MODEL,
            None,
            None,
        )
        .await
        .unwrap();
    let a1 = store
        .advance(&a0, "first", AdvanceOptions::default())
        .await
        .unwrap();
    let a2 = store
        .advance(&a1, "second", AdvanceOptions::default())
        .await
        .unwrap();

    let a1_conversation = a1.conversation_id;
    let shared_message_ids = store
        .get_conversation(a2.conversation_id)
        .await
        .unwrap()
        .unwrap()
        .message_ids
        .clone();

    assert!(store.delete_agent(a1.id).await.unwrap());
    store.clear_cache();

    // The child was re-parented by the foreign-key rule.
    let a2 = store.load_agent(a2.id).await.unwrap();
    assert_eq!(a2.parent_id, None);

    // The lineage walk terminates cleanly at the null parent.
    let lineage = store.get_lineage(&a2).await.unwrap();
    assert_eq!(lineage.len(), 1);
    assert_eq!(lineage[0].id, a2.id);

    // Orphans disappear only with gc: the deleted agent's conversation
    // goes; its messages survive because the child's snapshot shares them.
    store.gc().await.unwrap();
    store.clear_cache();
    assert!(store.get_conversation(a1_conversation).await.unwrap().is_none());
    for id in &shared_message_ids {
        assert!(store.get_message(*id).await.unwrap().is_some());
    }

    // Dropping the child orphans the messages; the root's prompt stays.
    assert!(store.delete_agent(a2.id).await.unwrap());
    store.gc().await.unwrap();
    store.clear_cache();
    for id in &shared_message_ids {
        assert!(store.get_message(*id).await.unwrap().is_none());
    }
    assert!(store.get_text(a0.system_prompt_id).await.unwrap().is_some());

    // gc is idempotent: a second pass finds nothing of ours.
    store.gc().await.unwrap();
    assert!(store.load_agent(a0.id).await.is_ok());

    store.close();
}

#[tokio::test]
async fn list_count_find_honor_their_filters() {
    let store = connect(vec![]).await;
    let marker = format!("marker-{}", Uuid::new_v4().simple());
    let lower = format!("{}-alpha", marker);
    let upper = format!("{}-BETA", marker.to_uppercase());

    store
        .create_agent(&lower, "You are helpful.", MODEL, None, None)
        .await
        .unwrap();
    store
        .create_agent(&upper, "You are helpful.", MODEL, None, None)
        .await
        .unwrap();

    // Substring filter is case-insensitive.
    assert_eq!(store.count_agents(Some(&marker)).await.unwrap(), 2);
    let listed = store.list_agents(10, 0, Some(&marker)).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].created_at >= listed[1].created_at);

    // Pagination.
    let page = store.list_agents(1, 1, Some(&marker)).await.unwrap();
    assert_eq!(page.len(), 1);

    // Exact match is case-sensitive.
    let exact = store.find_by_name(&lower).await.unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].name, lower);
    assert!(store
        .find_by_name(&lower.to_uppercase())
        .await
        .unwrap()
        .is_empty());

    store.close();
}

#[tokio::test]
async fn batch_load_returns_agents_in_input_order() {
    let store = connect(vec![]).await;
    let name = format!("batch-{}", Uuid::new_v4());
    let a = store
        .create_agent(&name, "You are helpful.", MODEL, None, None)
        .await
        .unwrap();
    let b = store.clone_agent(&a, None).await.unwrap();
    let c = store.clone_agent(&a, None).await.unwrap();

    store.clear_cache();
    let loaded = store.load_agents(&[c.id, a.id, b.id]).await.unwrap();
    let ids: Vec<_> = loaded.iter().map(|x| x.id).collect();
    assert_eq!(ids, vec![c.id, a.id, b.id]);

    let missing = immagent_core::AgentId::generate();
    assert!(store.load_agents(&[a.id, missing]).await.is_err());

    store.close();
}
