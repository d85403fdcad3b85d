//! ImmAgent Store - Persistence and Advance Engine
//!
//! The store records agent state as a content-addressed, append-only graph
//! of immutable assets, persisted in PostgreSQL and shared through a
//! process-local identity cache. Advancing an agent never mutates it: each
//! turn emits a new version pointing back at its parent, together with the
//! messages and conversation snapshot that version depends on, saved in a
//! single transaction.

mod advance;
mod cache;
mod pg;
mod store;

pub use advance::AdvanceOptions;
pub use cache::{Asset, IdentityCache, StrongCache, WeakCache};
pub use pg::{GcReport, PoolOptions};
pub use store::{AgentUpdate, Store};
