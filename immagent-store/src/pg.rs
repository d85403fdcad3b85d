//! PostgreSQL backend.
//!
//! Connection pooling via deadpool-postgres over a caller-supplied DSN.
//! Every read is a single typed statement; every write path is either one
//! insert-bundle transaction or the GC transaction. Inserts use
//! `ON CONFLICT (id) DO NOTHING` — assets are immutable, so a re-save of
//! an existing id is by definition the same row.

use crate::cache::Asset;
use immagent_core::{
    AgentId, AgentVersion, AssetIdType, Conversation, ConversationId, ImmAgentError,
    ImmAgentResult, Message, MessageId, ModelConfig, Role, StorageError, TextAsset, TextAssetId,
    ToolCall,
};
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolError, RecyclingMethod};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
-- Text assets (system prompts, etc.)
CREATE TABLE IF NOT EXISTS text_assets (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    content TEXT NOT NULL
);

-- Messages
CREATE TABLE IF NOT EXISTS messages (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    role TEXT NOT NULL,
    content TEXT,
    tool_calls JSONB,
    tool_call_id TEXT,
    input_tokens INTEGER,
    output_tokens INTEGER
);

-- Conversations (ordered snapshots of message IDs)
CREATE TABLE IF NOT EXISTS conversations (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    message_ids UUID[] NOT NULL
);

-- Agent versions
CREATE TABLE IF NOT EXISTS agents (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL,
    name TEXT NOT NULL,
    system_prompt_id UUID NOT NULL REFERENCES text_assets(id),
    parent_id UUID REFERENCES agents(id) ON DELETE SET NULL,
    conversation_id UUID NOT NULL REFERENCES conversations(id),
    model TEXT NOT NULL,
    model_config JSONB NOT NULL DEFAULT '{}',
    metadata JSONB NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_agents_parent_id ON agents(parent_id);
CREATE INDEX IF NOT EXISTS idx_agents_conversation_id ON agents(conversation_id);
CREATE INDEX IF NOT EXISTS idx_agents_name_lower ON agents(lower(name));
";

const AGENT_COLUMNS: &str =
    "id, created_at, name, system_prompt_id, parent_id, conversation_id, model, model_config, metadata";

const MESSAGE_COLUMNS: &str =
    "id, created_at, role, content, tool_calls, tool_call_id, input_tokens, output_tokens";

// ============================================================================
// POOL CONFIGURATION
// ============================================================================

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Connections opened eagerly at connect time.
    pub min_size: usize,
    /// Upper bound on pool size.
    pub max_size: usize,
    /// Idle connections older than this are reaped.
    pub max_inactive_connection_lifetime: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            max_inactive_connection_lifetime: Duration::from_secs(300),
        }
    }
}

/// Counts of rows removed by one `gc` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub messages: u64,
    pub conversations: u64,
    pub text_assets: u64,
}

// ============================================================================
// BACKEND
// ============================================================================

/// Pooled PostgreSQL backend for the store.
#[derive(Clone)]
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Connect to PostgreSQL. `min_size` connections are warmed up front;
    /// a background task reaps connections idle longer than
    /// `max_inactive_connection_lifetime`.
    pub async fn connect(dsn: &str, options: &PoolOptions) -> ImmAgentResult<Self> {
        let pg_config: tokio_postgres::Config =
            dsn.parse().map_err(|e: tokio_postgres::Error| {
                ImmAgentError::Storage(StorageError::Database {
                    reason: format!("Invalid DSN: {}", e),
                })
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(options.max_size)
            .build()
            .map_err(|e| {
                ImmAgentError::Storage(StorageError::Database {
                    reason: format!("Failed to create pool: {}", e),
                })
            })?;

        // Warm the minimum pool size.
        let mut warm = Vec::with_capacity(options.min_size);
        for _ in 0..options.min_size.min(options.max_size) {
            warm.push(pool.get().await.map_err(map_pool_error)?);
        }
        drop(warm);

        let lifetime = options.max_inactive_connection_lifetime;
        if !lifetime.is_zero() {
            let reaper = pool.clone();
            tokio::spawn(async move {
                let period = (lifetime / 2).max(Duration::from_secs(1));
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if reaper.is_closed() {
                        break;
                    }
                    reaper.retain(|_, metrics| metrics.last_used() < lifetime);
                }
            });
        }

        Ok(Self { pool })
    }

    /// Close the pool. Outstanding connections finish their work.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> ImmAgentResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(map_pool_error)
    }

    /// Create tables and indices. Idempotent.
    pub async fn init_schema(&self) -> ImmAgentResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA).await.map_err(map_pg_error)
    }

    // ========================================================================
    // SINGLE-ROW READS
    // ========================================================================

    pub async fn get_text(&self, id: TextAssetId) -> ImmAgentResult<Option<TextAsset>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, created_at, content FROM text_assets WHERE id = $1",
                &[&id.as_uuid()],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.map(|row| TextAsset {
            id: TextAssetId::new(row.get("id")),
            created_at: row.get("created_at"),
            content: row.get("content"),
        }))
    }

    pub async fn get_message(&self, id: MessageId) -> ImmAgentResult<Option<Message>> {
        let conn = self.get_conn().await?;
        let query = format!("SELECT {} FROM messages WHERE id = $1", MESSAGE_COLUMNS);
        let row = conn
            .query_opt(query.as_str(), &[&id.as_uuid()])
            .await
            .map_err(map_pg_error)?;
        row.map(|row| message_from_row(&row)).transpose()
    }

    /// Batch-fetch messages by id. Rows come back in table order; the
    /// caller reorders.
    pub async fn get_messages(&self, ids: &[MessageId]) -> ImmAgentResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let conn = self.get_conn().await?;
        let query = format!("SELECT {} FROM messages WHERE id = ANY($1)", MESSAGE_COLUMNS);
        let rows = conn
            .query(query.as_str(), &[&uuids])
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> ImmAgentResult<Option<Conversation>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, created_at, message_ids FROM conversations WHERE id = $1",
                &[&id.as_uuid()],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.map(|row| conversation_from_row(&row)))
    }

    pub async fn get_agent(&self, id: AgentId) -> ImmAgentResult<Option<AgentVersion>> {
        let conn = self.get_conn().await?;
        let query = format!("SELECT {} FROM agents WHERE id = $1", AGENT_COLUMNS);
        let row = conn
            .query_opt(query.as_str(), &[&id.as_uuid()])
            .await
            .map_err(map_pg_error)?;
        row.map(|row| agent_from_row(&row)).transpose()
    }

    /// Batch-fetch agents by id.
    pub async fn get_agents(&self, ids: &[AgentId]) -> ImmAgentResult<Vec<AgentVersion>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let conn = self.get_conn().await?;
        let query = format!("SELECT {} FROM agents WHERE id = ANY($1)", AGENT_COLUMNS);
        let rows = conn
            .query(query.as_str(), &[&uuids])
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(agent_from_row).collect()
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Persist one turn's assets atomically. Rows whose ids already exist
    /// are left untouched.
    pub async fn save_bundle(&self, assets: &[Asset]) -> ImmAgentResult<()> {
        if assets.is_empty() {
            return Ok(());
        }
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(map_pg_error)?;

        for asset in assets {
            match asset {
                Asset::Text(text) => {
                    tx.execute(
                        "INSERT INTO text_assets (id, created_at, content)
                         VALUES ($1, $2, $3)
                         ON CONFLICT (id) DO NOTHING",
                        &[&text.id.as_uuid(), &text.created_at, &text.content],
                    )
                    .await
                    .map_err(map_pg_error)?;
                }
                Asset::Message(message) => {
                    let tool_calls = tool_calls_to_json(&message.tool_calls)?;
                    tx.execute(
                        "INSERT INTO messages (id, created_at, role, content, tool_calls,
                                               tool_call_id, input_tokens, output_tokens)
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                         ON CONFLICT (id) DO NOTHING",
                        &[
                            &message.id.as_uuid(),
                            &message.created_at,
                            &message.role.as_db_str(),
                            &message.content,
                            &tool_calls,
                            &message.tool_call_id,
                            &message.input_tokens,
                            &message.output_tokens,
                        ],
                    )
                    .await
                    .map_err(map_pg_error)?;
                }
                Asset::Conversation(conversation) => {
                    let message_ids: Vec<Uuid> = conversation
                        .message_ids
                        .iter()
                        .map(|id| id.as_uuid())
                        .collect();
                    tx.execute(
                        "INSERT INTO conversations (id, created_at, message_ids)
                         VALUES ($1, $2, $3)
                         ON CONFLICT (id) DO NOTHING",
                        &[
                            &conversation.id.as_uuid(),
                            &conversation.created_at,
                            &message_ids,
                        ],
                    )
                    .await
                    .map_err(map_pg_error)?;
                }
                Asset::Agent(agent) => {
                    let model_config =
                        serde_json::to_value(&agent.model_config).map_err(|e| {
                            ImmAgentError::Storage(StorageError::Database {
                                reason: format!("Unserializable model_config: {}", e),
                            })
                        })?;
                    let metadata = JsonValue::Object(agent.metadata.clone());
                    tx.execute(
                        "INSERT INTO agents (id, created_at, name, system_prompt_id, parent_id,
                                             conversation_id, model, model_config, metadata)
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                         ON CONFLICT (id) DO NOTHING",
                        &[
                            &agent.id.as_uuid(),
                            &agent.created_at,
                            &agent.name,
                            &agent.system_prompt_id.as_uuid(),
                            &agent.parent_id.map(|id| id.as_uuid()),
                            &agent.conversation_id.as_uuid(),
                            &agent.model,
                            &model_config,
                            &metadata,
                        ],
                    )
                    .await
                    .map_err(map_pg_error)?;
                }
            }
        }

        tx.commit().await.map_err(map_pg_error)
    }

    /// Delete one agent row. Children are re-parented to NULL by the
    /// foreign-key rule. Returns whether a row was removed.
    pub async fn delete_agent(&self, id: AgentId) -> ImmAgentResult<bool> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM agents WHERE id = $1", &[&id.as_uuid()])
            .await
            .map_err(map_pg_error)?;
        Ok(deleted > 0)
    }

    /// Remove assets no longer reachable from any agent, in one
    /// transaction. "Remaining" is evaluated against the rows that survive
    /// this same transaction, so one pass leaves no orphans and a second
    /// pass deletes nothing.
    pub async fn gc(&self) -> ImmAgentResult<GcReport> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(map_pg_error)?;

        let messages = tx
            .execute(
                "DELETE FROM messages WHERE id NOT IN (
                     SELECT unnest(c.message_ids) FROM conversations c
                     WHERE c.id IN (SELECT conversation_id FROM agents)
                 )",
                &[],
            )
            .await
            .map_err(map_pg_error)?;

        let conversations = tx
            .execute(
                "DELETE FROM conversations
                 WHERE id NOT IN (SELECT conversation_id FROM agents)",
                &[],
            )
            .await
            .map_err(map_pg_error)?;

        let text_assets = tx
            .execute(
                "DELETE FROM text_assets
                 WHERE id NOT IN (SELECT system_prompt_id FROM agents)",
                &[],
            )
            .await
            .map_err(map_pg_error)?;

        tx.commit().await.map_err(map_pg_error)?;

        Ok(GcReport {
            messages,
            conversations,
            text_assets,
        })
    }

    // ========================================================================
    // LINEAGE & SEARCH
    // ========================================================================

    /// Walk the parent chain in a single recursive query. Rows come back
    /// child-first; the store reverses to root-first.
    pub async fn lineage(&self, id: AgentId) -> ImmAgentResult<Vec<AgentVersion>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "WITH RECURSIVE lineage AS (
                     SELECT id, created_at, name, system_prompt_id, parent_id,
                            conversation_id, model, model_config, metadata
                     FROM agents WHERE id = $1
                     UNION ALL
                     SELECT a.id, a.created_at, a.name, a.system_prompt_id, a.parent_id,
                            a.conversation_id, a.model, a.model_config, a.metadata
                     FROM agents a
                     INNER JOIN lineage l ON a.id = l.parent_id
                 )
                 SELECT * FROM lineage",
                &[&id.as_uuid()],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(agent_from_row).collect()
    }

    /// Page through agents, newest first, optionally filtered by a
    /// case-insensitive name substring.
    pub async fn list_agents(
        &self,
        limit: i64,
        offset: i64,
        name: Option<&str>,
    ) -> ImmAgentResult<Vec<AgentVersion>> {
        let conn = self.get_conn().await?;
        let rows = match name {
            Some(name) => {
                let pattern = format!("%{}%", name);
                let query = format!(
                    "SELECT {} FROM agents
                     WHERE name ILIKE $1
                     ORDER BY created_at DESC
                     LIMIT $2 OFFSET $3",
                    AGENT_COLUMNS
                );
                conn.query(query.as_str(), &[&pattern, &limit, &offset]).await
            }
            None => {
                let query = format!(
                    "SELECT {} FROM agents
                     ORDER BY created_at DESC
                     LIMIT $1 OFFSET $2",
                    AGENT_COLUMNS
                );
                conn.query(query.as_str(), &[&limit, &offset]).await
            }
        }
        .map_err(map_pg_error)?;
        rows.iter().map(agent_from_row).collect()
    }

    /// Count agents, with the same filter semantics as `list_agents`.
    pub async fn count_agents(&self, name: Option<&str>) -> ImmAgentResult<i64> {
        let conn = self.get_conn().await?;
        let row = match name {
            Some(name) => {
                let pattern = format!("%{}%", name);
                conn.query_one(
                    "SELECT COUNT(*) FROM agents WHERE name ILIKE $1",
                    &[&pattern],
                )
                .await
            }
            None => conn.query_one("SELECT COUNT(*) FROM agents", &[]).await,
        }
        .map_err(map_pg_error)?;
        Ok(row.get(0))
    }

    /// Exact, case-sensitive name match, newest first.
    pub async fn find_by_name(&self, name: &str) -> ImmAgentResult<Vec<AgentVersion>> {
        let conn = self.get_conn().await?;
        let query = format!(
            "SELECT {} FROM agents
             WHERE name = $1
             ORDER BY created_at DESC",
            AGENT_COLUMNS
        );
        let rows = conn
            .query(query.as_str(), &[&name])
            .await
            .map_err(map_pg_error)?;
        rows.iter().map(agent_from_row).collect()
    }
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

fn corrupt_row(what: &str, detail: impl std::fmt::Display) -> ImmAgentError {
    ImmAgentError::Storage(StorageError::Database {
        reason: format!("Corrupt {} row: {}", what, detail),
    })
}

fn tool_calls_to_json(tool_calls: &[ToolCall]) -> ImmAgentResult<Option<JsonValue>> {
    if tool_calls.is_empty() {
        return Ok(None);
    }
    serde_json::to_value(tool_calls)
        .map(Some)
        .map_err(|e| corrupt_row("message", format!("unserializable tool_calls: {}", e)))
}

fn message_from_row(row: &Row) -> ImmAgentResult<Message> {
    let role: &str = row.get("role");
    let role = Role::from_db_str(role).map_err(|e| corrupt_row("message", e))?;

    let tool_calls: Option<JsonValue> = row.get("tool_calls");
    let tool_calls: Vec<ToolCall> = match tool_calls {
        Some(value) => {
            serde_json::from_value(value).map_err(|e| corrupt_row("message", e))?
        }
        None => Vec::new(),
    };

    Ok(Message {
        id: MessageId::new(row.get("id")),
        created_at: row.get("created_at"),
        role,
        content: row.get("content"),
        tool_calls,
        tool_call_id: row.get("tool_call_id"),
        input_tokens: row.get("input_tokens"),
        output_tokens: row.get("output_tokens"),
    })
}

fn conversation_from_row(row: &Row) -> Conversation {
    let message_ids: Vec<Uuid> = row.get("message_ids");
    Conversation {
        id: ConversationId::new(row.get("id")),
        created_at: row.get("created_at"),
        message_ids: message_ids.into_iter().map(MessageId::new).collect(),
    }
}

fn agent_from_row(row: &Row) -> ImmAgentResult<AgentVersion> {
    let model_config: JsonValue = row.get("model_config");
    let model_config: ModelConfig =
        serde_json::from_value(model_config).map_err(|e| corrupt_row("agent", e))?;

    let metadata: JsonValue = row.get("metadata");
    let metadata = match metadata {
        JsonValue::Object(map) => map,
        _ => Default::default(),
    };

    let parent_id: Option<Uuid> = row.get("parent_id");

    Ok(AgentVersion {
        id: AgentId::new(row.get("id")),
        created_at: row.get("created_at"),
        name: row.get("name"),
        system_prompt_id: TextAssetId::new(row.get("system_prompt_id")),
        parent_id: parent_id.map(AgentId::new),
        conversation_id: ConversationId::new(row.get("conversation_id")),
        model: row.get("model"),
        model_config,
        metadata,
    })
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn map_pool_error(err: PoolError) -> ImmAgentError {
    let storage = match &err {
        PoolError::Timeout(_) | PoolError::Closed => StorageError::PoolExhausted {
            reason: err.to_string(),
        },
        _ => StorageError::Database {
            reason: err.to_string(),
        },
    };
    ImmAgentError::Storage(storage)
}

fn map_pg_error(err: tokio_postgres::Error) -> ImmAgentError {
    let integrity = matches!(
        err.code(),
        Some(code)
            if *code == SqlState::FOREIGN_KEY_VIOLATION
                || *code == SqlState::UNIQUE_VIOLATION
                || *code == SqlState::NOT_NULL_VIOLATION
                || *code == SqlState::CHECK_VIOLATION
    );
    let storage = if integrity {
        StorageError::Integrity {
            detail: err.to_string(),
        }
    } else {
        StorageError::Database {
            reason: err.to_string(),
        }
    };
    ImmAgentError::Storage(storage)
}
