//! ImmAgent Core - Asset Types
//!
//! Pure data structures with no behavior beyond construction. All other
//! crates depend on this. Every value here is immutable once built: a
//! state transition always produces a new value with a fresh UUID.

mod assets;
mod config;
mod error;
mod identity;
mod validation;

pub use assets::*;
pub use config::*;
pub use error::*;
pub use identity::*;
pub use validation::*;

/// UTC timestamp used on every asset.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current UTC time, the `created_at` of a freshly built asset.
///
/// Truncated to microseconds, the resolution of TIMESTAMPTZ, so a saved
/// asset reloads equal in every field.
pub fn now() -> Timestamp {
    use chrono::Timelike;
    let t = chrono::Utc::now();
    t.with_nanosecond(t.nanosecond() / 1_000 * 1_000).unwrap_or(t)
}
