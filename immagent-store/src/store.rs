//! The Store: unified cache and database access for agents.
//!
//! A `Store` combines the authoritative backend (PostgreSQL, or nothing
//! for the in-memory variant) with the identity cache and the completion
//! provider used by `advance`. Reads are cache-first; the write path
//! always caches dependencies before the value that references them, so a
//! later `save` can assemble the whole bundle from the cache.

use crate::advance::{self, AdvanceOptions};
use crate::cache::{Asset, IdentityCache, StrongCache, WeakCache};
use crate::pg::{GcReport, PgBackend, PoolOptions};
use immagent_core::{
    AgentId, AgentVersion, AssetIdType, Conversation, ConversationId, ImmAgentResult, Message,
    MessageId, ModelConfig, NotFoundError, TextAsset, TextAssetId, ValidateNonEmpty,
};
use immagent_llm::{CompletionProvider, ProviderRouter};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Replacement fields for `with_update`. Unset fields carry over from the
/// source agent.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub model: Option<String>,
    pub model_config: Option<ModelConfig>,
    pub metadata: Option<JsonMap<String, JsonValue>>,
}

impl AgentUpdate {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.model.is_none()
            && self.model_config.is_none()
            && self.metadata.is_none()
    }
}

/// Unified cache and database access for agents.
///
/// Persistent stores come from [`Store::connect`] and share canonical
/// asset instances through a weak-valued cache; [`Store::in_memory`]
/// builds a store with no database behind a retaining cache, useful for
/// tests and stateless experimentation.
pub struct Store {
    backend: Option<PgBackend>,
    cache: Arc<dyn IdentityCache>,
    completions: Arc<dyn CompletionProvider>,
}

impl Store {
    /// Connect to PostgreSQL.
    ///
    /// The completion provider defaults to the environment-driven router
    /// (`ANTHROPIC_API_KEY` / `OPENAI_API_KEY`); swap it with
    /// [`Store::with_completions`].
    pub async fn connect(dsn: &str, options: PoolOptions) -> ImmAgentResult<Self> {
        let backend = PgBackend::connect(dsn, &options).await?;
        Ok(Self {
            backend: Some(backend),
            cache: Arc::new(WeakCache::new()),
            completions: Arc::new(ProviderRouter::from_env()),
        })
    }

    /// A store with no database persistence. Assets live in the cache
    /// until explicitly removed or the store is dropped.
    pub fn in_memory() -> Self {
        Self {
            backend: None,
            cache: Arc::new(StrongCache::new()),
            completions: Arc::new(ProviderRouter::from_env()),
        }
    }

    /// Replace the completion provider.
    pub fn with_completions(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completions = provider;
        self
    }

    /// Whether this store has a database behind it.
    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    /// Close the connection pool (no-op for in-memory stores).
    pub fn close(&self) {
        if let Some(backend) = &self.backend {
            backend.close();
        }
    }

    /// Create tables and indices. Idempotent; no-op for in-memory stores.
    pub async fn init_schema(&self) -> ImmAgentResult<()> {
        match &self.backend {
            Some(backend) => backend.init_schema().await,
            None => Ok(()),
        }
    }

    /// Drop all cache entries.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub(crate) fn completions(&self) -> Arc<dyn CompletionProvider> {
        Arc::clone(&self.completions)
    }

    // ========================================================================
    // CACHE-FIRST READS
    // ========================================================================

    fn cached(&self, id: Uuid) -> Option<Asset> {
        self.cache.get(id)
    }

    fn intern_agent(&self, agent: AgentVersion) -> Arc<AgentVersion> {
        if let Some(cached) = self.cached(agent.id.as_uuid()).and_then(|a| a.as_agent()) {
            return cached;
        }
        let agent = Arc::new(agent);
        self.cache.put(Asset::Agent(Arc::clone(&agent)));
        agent
    }

    /// Get a text asset by id. Absent ids return `None`, not an error.
    pub async fn get_text(&self, id: TextAssetId) -> ImmAgentResult<Option<Arc<TextAsset>>> {
        if let Some(asset) = self.cached(id.as_uuid()) {
            return Ok(asset.as_text());
        }
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        Ok(backend.get_text(id).await?.map(|text| {
            let text = Arc::new(text);
            self.cache.put(Asset::Text(Arc::clone(&text)));
            text
        }))
    }

    /// Get a message by id.
    pub async fn get_message(&self, id: MessageId) -> ImmAgentResult<Option<Arc<Message>>> {
        if let Some(asset) = self.cached(id.as_uuid()) {
            return Ok(asset.as_message());
        }
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        Ok(backend.get_message(id).await?.map(|message| {
            let message = Arc::new(message);
            self.cache.put(Asset::Message(Arc::clone(&message)));
            message
        }))
    }

    /// Get a conversation by id.
    pub async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> ImmAgentResult<Option<Arc<Conversation>>> {
        if let Some(asset) = self.cached(id.as_uuid()) {
            return Ok(asset.as_conversation());
        }
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        Ok(backend.get_conversation(id).await?.map(|conversation| {
            let conversation = Arc::new(conversation);
            self.cache
                .put(Asset::Conversation(Arc::clone(&conversation)));
            conversation
        }))
    }

    /// Get an agent by id.
    pub async fn get_agent(&self, id: AgentId) -> ImmAgentResult<Option<Arc<AgentVersion>>> {
        if let Some(asset) = self.cached(id.as_uuid()) {
            return Ok(asset.as_agent());
        }
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        Ok(backend.get_agent(id).await?.map(|agent| {
            let agent = Arc::new(agent);
            self.cache.put(Asset::Agent(Arc::clone(&agent)));
            agent
        }))
    }

    /// Resolve an ordered list of message ids, batching the cache misses.
    /// Fails with `message_not_found` if any id cannot be resolved.
    pub(crate) async fn resolve_messages(
        &self,
        ids: &[MessageId],
    ) -> ImmAgentResult<Vec<Arc<Message>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<MessageId, Arc<Message>> = HashMap::with_capacity(ids.len());
        let mut to_load: Vec<MessageId> = Vec::new();
        for id in ids {
            match self.cached(id.as_uuid()).and_then(|a| a.as_message()) {
                Some(message) => {
                    by_id.insert(*id, message);
                }
                None => to_load.push(*id),
            }
        }

        if !to_load.is_empty() {
            if let Some(backend) = &self.backend {
                tracing::debug!(count = to_load.len(), "Batch-loading messages");
                for message in backend.get_messages(&to_load).await? {
                    let message = Arc::new(message);
                    self.cache.put(Asset::Message(Arc::clone(&message)));
                    by_id.insert(message.id, message);
                }
            }
        }

        ids.iter()
            .map(|id| {
                by_id
                    .get(id)
                    .cloned()
                    .ok_or_else(|| NotFoundError::Message(*id).into())
            })
            .collect()
    }

    // ========================================================================
    // SAVE
    // ========================================================================

    /// Persist an agent together with its cached dependencies (system
    /// prompt, conversation, the conversation's messages) in a single
    /// transaction. Rows already present are untouched.
    pub async fn save(&self, agent: &Arc<AgentVersion>) -> ImmAgentResult<()> {
        let mut bundle: Vec<Asset> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();

        // Dependencies first: rows must exist before the agent row's
        // foreign keys reference them.
        if let Some(prompt) = self
            .cached(agent.system_prompt_id.as_uuid())
            .and_then(|a| a.as_text())
        {
            if seen.insert(prompt.id.as_uuid()) {
                bundle.push(Asset::Text(prompt));
            }
        }
        if let Some(conversation) = self
            .cached(agent.conversation_id.as_uuid())
            .and_then(|a| a.as_conversation())
        {
            for message_id in &conversation.message_ids {
                if let Some(message) =
                    self.cached(message_id.as_uuid()).and_then(|a| a.as_message())
                {
                    if seen.insert(message.id.as_uuid()) {
                        bundle.push(Asset::Message(message));
                    }
                }
            }
            if seen.insert(conversation.id.as_uuid()) {
                bundle.push(Asset::Conversation(conversation));
            }
        }
        bundle.push(Asset::Agent(Arc::clone(agent)));

        if let Some(backend) = &self.backend {
            backend.save_bundle(&bundle).await?;
        }

        for asset in bundle {
            self.cache.put(asset);
        }
        Ok(())
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Create a new agent over a fresh system prompt and an empty
    /// conversation. The whole bundle is cached and persisted immediately.
    pub async fn create_agent(
        &self,
        name: &str,
        system_prompt: &str,
        model: &str,
        model_config: Option<ModelConfig>,
        metadata: Option<JsonMap<String, JsonValue>>,
    ) -> ImmAgentResult<Arc<AgentVersion>> {
        name.validate_non_empty("name")?;
        system_prompt.validate_non_empty("system_prompt")?;
        model.validate_non_empty("model")?;

        let prompt = Arc::new(TextAsset::new(system_prompt));
        let conversation = Arc::new(Conversation::new());
        let agent = Arc::new(AgentVersion::root(
            name,
            prompt.id,
            conversation.id,
            model,
            model_config.unwrap_or_default(),
            metadata.unwrap_or_default(),
        ));

        // Cache first: save() assembles the bundle from the cache.
        self.cache.put(Asset::Text(prompt));
        self.cache.put(Asset::Conversation(conversation));
        self.cache.put(Asset::Agent(Arc::clone(&agent)));

        self.save(&agent).await?;

        tracing::info!(agent_id = %agent.id, name = %agent.name, model = %agent.model, "Created agent");
        Ok(agent)
    }

    /// Load an agent by id, failing with `agent_not_found` if absent.
    pub async fn load_agent(&self, id: AgentId) -> ImmAgentResult<Arc<AgentVersion>> {
        self.get_agent(id)
            .await?
            .ok_or_else(|| NotFoundError::Agent(id).into())
    }

    /// Load several agents in one round trip, in input order. Fails with
    /// `agent_not_found` on the first unresolvable id.
    pub async fn load_agents(&self, ids: &[AgentId]) -> ImmAgentResult<Vec<Arc<AgentVersion>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<AgentId, Arc<AgentVersion>> = HashMap::with_capacity(ids.len());
        let mut to_load: Vec<AgentId> = Vec::new();
        for id in ids {
            match self.cached(id.as_uuid()).and_then(|a| a.as_agent()) {
                Some(agent) => {
                    by_id.insert(*id, agent);
                }
                None => to_load.push(*id),
            }
        }

        if !to_load.is_empty() {
            if let Some(backend) = &self.backend {
                for agent in backend.get_agents(&to_load).await? {
                    let agent = self.intern_agent(agent);
                    by_id.insert(agent.id, agent);
                }
            }
        }

        ids.iter()
            .map(|id| {
                by_id
                    .get(id)
                    .cloned()
                    .ok_or_else(|| NotFoundError::Agent(*id).into())
            })
            .collect()
    }

    /// Advance the agent one turn. See [`AdvanceOptions`].
    pub async fn advance(
        &self,
        agent: &AgentVersion,
        user_input: &str,
        options: AdvanceOptions,
    ) -> ImmAgentResult<Arc<AgentVersion>> {
        advance::advance(self, agent, user_input, options).await
    }

    /// All messages in the agent's conversation, in order.
    pub async fn get_messages(&self, agent: &AgentVersion) -> ImmAgentResult<Vec<Arc<Message>>> {
        let conversation = self
            .get_conversation(agent.conversation_id)
            .await?
            .ok_or(NotFoundError::Conversation(agent.conversation_id))?;
        self.resolve_messages(&conversation.message_ids).await
    }

    /// Emit a sibling of `agent`: fresh id, same parent, same
    /// conversation. Lets callers branch alternative futures from one
    /// history.
    pub async fn clone_agent(
        &self,
        agent: &AgentVersion,
        new_name: Option<String>,
    ) -> ImmAgentResult<Arc<AgentVersion>> {
        if let Some(name) = &new_name {
            name.validate_non_empty("new_name")?;
        }
        let sibling = Arc::new(agent.sibling(new_name));
        self.cache.put(Asset::Agent(Arc::clone(&sibling)));
        self.save(&sibling).await?;
        Ok(sibling)
    }

    /// Emit a child of `agent` with altered name/model/config/metadata and
    /// the same conversation.
    pub async fn with_update(
        &self,
        agent: &AgentVersion,
        update: AgentUpdate,
    ) -> ImmAgentResult<Arc<AgentVersion>> {
        if let Some(name) = &update.name {
            name.validate_non_empty("name")?;
        }
        if let Some(model) = &update.model {
            model.validate_non_empty("model")?;
        }

        let child = Arc::new(AgentVersion {
            id: AgentId::generate(),
            created_at: immagent_core::now(),
            name: update.name.unwrap_or_else(|| agent.name.clone()),
            system_prompt_id: agent.system_prompt_id,
            parent_id: Some(agent.id),
            conversation_id: agent.conversation_id,
            model: update.model.unwrap_or_else(|| agent.model.clone()),
            model_config: update
                .model_config
                .unwrap_or_else(|| agent.model_config.clone()),
            metadata: update.metadata.unwrap_or_else(|| agent.metadata.clone()),
        });
        self.cache.put(Asset::Agent(Arc::clone(&child)));
        self.save(&child).await?;
        Ok(child)
    }

    /// Emit a child of `agent` carrying new metadata and everything else
    /// unchanged. Shorthand for [`Store::with_update`].
    pub async fn with_metadata(
        &self,
        agent: &AgentVersion,
        metadata: JsonMap<String, JsonValue>,
    ) -> ImmAgentResult<Arc<AgentVersion>> {
        self.with_update(
            agent,
            AgentUpdate {
                metadata: Some(metadata),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete one agent record from the database and cache. Dependent
    /// assets are left for [`Store::gc`].
    pub async fn delete_agent(&self, id: AgentId) -> ImmAgentResult<bool> {
        let deleted = match &self.backend {
            Some(backend) => backend.delete_agent(id).await?,
            None => self
                .cached(id.as_uuid())
                .and_then(|a| a.as_agent())
                .is_some(),
        };
        self.cache.forget(id.as_uuid());
        if deleted {
            tracing::info!(agent_id = %id, "Deleted agent");
        }
        Ok(deleted)
    }

    /// Remove assets unreachable from any remaining agent. Safe to call
    /// anytime; a second pass removes nothing. In-memory stores have no
    /// orphan table to sweep and report zero counts.
    pub async fn gc(&self) -> ImmAgentResult<GcReport> {
        match &self.backend {
            Some(backend) => {
                let report = backend.gc().await?;
                tracing::info!(
                    messages = report.messages,
                    conversations = report.conversations,
                    text_assets = report.text_assets,
                    "GC removed unreferenced assets"
                );
                Ok(report)
            }
            None => Ok(GcReport::default()),
        }
    }

    // ========================================================================
    // LINEAGE & SEARCH
    // ========================================================================

    /// The chain from the root version down to `agent`.
    ///
    /// The database path resolves the whole chain with one recursive
    /// query; the in-memory path walks `parent_id` through the cache and
    /// fails with `agent_not_found` on a broken link. Every walked version
    /// is cached for future calls.
    pub async fn get_lineage(
        &self,
        agent: &AgentVersion,
    ) -> ImmAgentResult<Vec<Arc<AgentVersion>>> {
        let Some(backend) = &self.backend else {
            return self.lineage_from_cache(agent).await;
        };

        let rows = backend.lineage(agent.id).await?;
        if rows.is_empty() {
            return Err(NotFoundError::Agent(agent.id).into());
        }
        // Rows are child-first; flip to root-first.
        let mut lineage: Vec<Arc<AgentVersion>> =
            rows.into_iter().map(|row| self.intern_agent(row)).collect();
        lineage.reverse();
        Ok(lineage)
    }

    async fn lineage_from_cache(
        &self,
        agent: &AgentVersion,
    ) -> ImmAgentResult<Vec<Arc<AgentVersion>>> {
        let mut current = self
            .get_agent(agent.id)
            .await?
            .ok_or(NotFoundError::Agent(agent.id))?;
        let mut lineage: Vec<Arc<AgentVersion>> = vec![Arc::clone(&current)];

        while let Some(parent_id) = current.parent_id {
            let parent = self
                .get_agent(parent_id)
                .await?
                .ok_or(NotFoundError::Agent(parent_id))?;
            lineage.push(Arc::clone(&parent));
            current = parent;
        }
        lineage.reverse();
        Ok(lineage)
    }

    /// List agents newest-first with pagination and an optional
    /// case-insensitive name substring filter.
    pub async fn list_agents(
        &self,
        limit: i64,
        offset: i64,
        name: Option<&str>,
    ) -> ImmAgentResult<Vec<Arc<AgentVersion>>> {
        let Some(backend) = &self.backend else {
            let mut agents = self.cached_agents(name);
            agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            return Ok(agents
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .collect());
        };

        let rows = backend.list_agents(limit, offset, name).await?;
        Ok(rows.into_iter().map(|row| self.intern_agent(row)).collect())
    }

    /// Count agents with the same filter semantics as `list_agents`.
    pub async fn count_agents(&self, name: Option<&str>) -> ImmAgentResult<i64> {
        match &self.backend {
            Some(backend) => backend.count_agents(name).await,
            None => Ok(self.cached_agents(name).len() as i64),
        }
    }

    /// Agents whose name matches exactly (case-sensitive), newest first.
    pub async fn find_by_name(&self, name: &str) -> ImmAgentResult<Vec<Arc<AgentVersion>>> {
        let Some(backend) = &self.backend else {
            let mut agents: Vec<Arc<AgentVersion>> = self
                .cache
                .assets()
                .into_iter()
                .filter_map(|a| a.as_agent())
                .filter(|a| a.name == name)
                .collect();
            agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            return Ok(agents);
        };

        let rows = backend.find_by_name(name).await?;
        Ok(rows.into_iter().map(|row| self.intern_agent(row)).collect())
    }

    fn cached_agents(&self, name: Option<&str>) -> Vec<Arc<AgentVersion>> {
        let filter = name.map(str::to_lowercase);
        self.cache
            .assets()
            .into_iter()
            .filter_map(|a| a.as_agent())
            .filter(|a| match &filter {
                Some(needle) => a.name.to_lowercase().contains(needle),
                None => true,
            })
            .collect()
    }

    pub(crate) fn cache(&self) -> &Arc<dyn IdentityCache> {
        &self.cache
    }
}
