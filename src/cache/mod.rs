//! Versioned asset cache.
//!
//! This module keeps one cache generation per deployed version:
//! - Populates the current generation from the asset manifest at install
//! - Serves hits straight from storage (cache-first, no revalidation)
//! - Fetches and stores misses
//! - Purges generations left over from previous versions at activation

mod layer;
mod storage;
mod traits;

pub use layer::{generation_name, AssetCache};
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource};
