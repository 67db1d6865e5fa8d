//! # Cache Module
//!
//! Metadata cache for the song resolver.
//!
//! Resolving a URL costs one or more HTTP round-trips to a backend. Lookups by
//! id are memoised here so the same link pasted twice in a row, or by two
//! guilds at once, only hits the backend once. Free-text searches are never
//! cached since their ranking changes over time.
//!
//! ## Configuration
//!
//! ```env
//! CACHE_SIZE=100   # Maximum number of metadata entries
//! CACHE_TTL=1h     # Time-to-live (humantime format)
//! ```

pub mod lru_cache;

use lru_cache::LRUCache;
use tracing::info;

use crate::sources::{SongMetadata, Source};

/// Cache key: backend plus the backend-specific id.
pub type CacheKey = (Source, String);

/// Cache of resolved songs keyed by `(source, id)`.
pub type MetadataCache = LRUCache<CacheKey, SongMetadata>;

impl MetadataCache {
    /// Removes expired entries and logs how many were dropped.
    ///
    /// Intended to be called from a periodic background task.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache cleanup: removed {} expired entries", removed);
        }
    }
}
