//! Identity cache: process-local UUID -> asset mapping.
//!
//! The cache is an accelerator over the authoritative backend, not a
//! consistency boundary. Because assets are immutable, a hit can be handed
//! out without any staleness concern; the only question a variant answers
//! is who keeps entries alive. `WeakCache` (persistent backend) observes
//! assets without extending their lifetime; `StrongCache` (in-memory
//! backend) retains them until told otherwise, since there is no database
//! to recover an evicted entry from.

use immagent_core::{AgentVersion, AssetIdType, Conversation, Message, TextAsset};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Any cached asset, wrapped in `Arc` so every holder shares the single
/// canonical instance.
#[derive(Debug, Clone)]
pub enum Asset {
    Text(Arc<TextAsset>),
    Message(Arc<Message>),
    Conversation(Arc<Conversation>),
    Agent(Arc<AgentVersion>),
}

impl Asset {
    /// The asset's UUID.
    pub fn id(&self) -> Uuid {
        match self {
            Self::Text(a) => a.id.as_uuid(),
            Self::Message(m) => m.id.as_uuid(),
            Self::Conversation(c) => c.id.as_uuid(),
            Self::Agent(a) => a.id.as_uuid(),
        }
    }

    pub fn as_text(&self) -> Option<Arc<TextAsset>> {
        match self {
            Self::Text(a) => Some(Arc::clone(a)),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<Arc<Message>> {
        match self {
            Self::Message(m) => Some(Arc::clone(m)),
            _ => None,
        }
    }

    pub fn as_conversation(&self) -> Option<Arc<Conversation>> {
        match self {
            Self::Conversation(c) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    pub fn as_agent(&self) -> Option<Arc<AgentVersion>> {
        match self {
            Self::Agent(a) => Some(Arc::clone(a)),
            _ => None,
        }
    }

    fn downgrade(&self) -> WeakAsset {
        match self {
            Self::Text(a) => WeakAsset::Text(Arc::downgrade(a)),
            Self::Message(m) => WeakAsset::Message(Arc::downgrade(m)),
            Self::Conversation(c) => WeakAsset::Conversation(Arc::downgrade(c)),
            Self::Agent(a) => WeakAsset::Agent(Arc::downgrade(a)),
        }
    }

    fn ptr_eq(&self, other: &Asset) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Arc::ptr_eq(a, b),
            (Self::Message(a), Self::Message(b)) => Arc::ptr_eq(a, b),
            (Self::Conversation(a), Self::Conversation(b)) => Arc::ptr_eq(a, b),
            (Self::Agent(a), Self::Agent(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Arc<TextAsset>> for Asset {
    fn from(a: Arc<TextAsset>) -> Self {
        Self::Text(a)
    }
}

impl From<Arc<Message>> for Asset {
    fn from(m: Arc<Message>) -> Self {
        Self::Message(m)
    }
}

impl From<Arc<Conversation>> for Asset {
    fn from(c: Arc<Conversation>) -> Self {
        Self::Conversation(c)
    }
}

impl From<Arc<AgentVersion>> for Asset {
    fn from(a: Arc<AgentVersion>) -> Self {
        Self::Agent(a)
    }
}

/// Non-owning counterpart of `Asset`.
#[derive(Debug, Clone)]
enum WeakAsset {
    Text(Weak<TextAsset>),
    Message(Weak<Message>),
    Conversation(Weak<Conversation>),
    Agent(Weak<AgentVersion>),
}

impl WeakAsset {
    fn upgrade(&self) -> Option<Asset> {
        match self {
            Self::Text(w) => w.upgrade().map(Asset::Text),
            Self::Message(w) => w.upgrade().map(Asset::Message),
            Self::Conversation(w) => w.upgrade().map(Asset::Conversation),
            Self::Agent(w) => w.upgrade().map(Asset::Agent),
        }
    }
}

/// The cache contract shared by both variants.
///
/// All operations are O(1) map updates under a mutex held only for the
/// update itself; nothing here suspends.
pub trait IdentityCache: Send + Sync {
    /// Return the canonical instance for `id`, if still live.
    fn get(&self, id: Uuid) -> Option<Asset>;

    /// Insert an asset. Idempotent: re-putting the same instance is a
    /// no-op. Re-putting an id with a *different* instance is a programmer
    /// error (assets are immutable) and debug-asserted.
    fn put(&self, asset: Asset);

    /// Remove one entry.
    fn forget(&self, id: Uuid);

    /// Drop all entries.
    fn clear(&self);

    /// Snapshot of all live entries. Used by the in-memory backend to
    /// answer list queries; not part of the hot path.
    fn assets(&self) -> Vec<Asset>;
}

/// Observer-only cache for the persistent backend: entries vanish once no
/// client holds the asset, so the cache alone never retains memory.
#[derive(Default)]
pub struct WeakCache {
    entries: Mutex<HashMap<Uuid, WeakAsset>>,
}

impl WeakCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityCache for WeakCache {
    fn get(&self, id: Uuid) -> Option<Asset> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(&id).and_then(WeakAsset::upgrade) {
            Some(asset) => Some(asset),
            None => {
                // Prune the dead entry, if any.
                entries.remove(&id);
                None
            }
        }
    }

    fn put(&self, asset: Asset) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if let Some(existing) = entries.get(&asset.id()).and_then(WeakAsset::upgrade) {
            debug_assert!(
                existing.ptr_eq(&asset),
                "cache put would replace a live asset with a distinct instance"
            );
            return;
        }
        entries.insert(asset.id(), asset.downgrade());
    }

    fn forget(&self, id: Uuid) {
        self.entries.lock().expect("cache lock poisoned").remove(&id);
    }

    fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    fn assets(&self) -> Vec<Asset> {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .values()
            .filter_map(WeakAsset::upgrade)
            .collect()
    }
}

/// Retaining cache for the in-memory backend: it *is* the store, so
/// entries live until explicit removal.
#[derive(Default)]
pub struct StrongCache {
    entries: Mutex<HashMap<Uuid, Asset>>,
}

impl StrongCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityCache for StrongCache {
    fn get(&self, id: Uuid) -> Option<Asset> {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .get(&id)
            .cloned()
    }

    fn put(&self, asset: Asset) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        if let Some(existing) = entries.get(&asset.id()) {
            debug_assert!(
                existing.ptr_eq(&asset),
                "cache put would replace a live asset with a distinct instance"
            );
            return;
        }
        entries.insert(asset.id(), asset);
    }

    fn forget(&self, id: Uuid) {
        self.entries.lock().expect("cache lock poisoned").remove(&id);
    }

    fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    fn assets(&self) -> Vec<Asset> {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}
