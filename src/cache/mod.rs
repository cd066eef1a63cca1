//! Versioned response cache.
//!
//! This module provides the storage side of the offline layer:
//! - Named stores of response snapshots keyed by normalized (URL, method)
//! - One store per cache generation, evicted wholesale when superseded
//! - Atomic pre-caching of an asset list

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub(crate) use storage::blocking;
pub use traits::{CacheKey, CachedResponse, ResponseSource};
