//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Response snapshots keyed by normalized request identity
//! - Named namespaces, one per deployed version
//! - All-or-nothing pre-caching of a fixed asset manifest
//! - Eviction of every namespace that is not current

mod layer;
mod storage;
mod traits;

pub use layer::CacheStore;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheSource, CachedEntry, RequestKey};
