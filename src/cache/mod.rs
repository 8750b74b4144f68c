//! Two-tier caching for source documents and analysis results
//!
//! Each cache is an explicit object with an `open`/`close` lifecycle and is
//! handed to the components that need it; there is no process-wide
//! instance. A run uses two caches with the same shape: one for
//! documents read from the document store, one for analysis results.

mod merge;
mod tier;
mod two_tier;

pub use merge::{
    apply_partial_update, canonicalize_publish_payload, find_publish_payload, get_path,
    PUBLISH_PAYLOAD_FIELD,
};
pub use tier::{CacheEntry, CacheError, CacheResult, FileTier, PersistentTier, SqliteTier};
pub use two_tier::{CacheStats, TwoTierCache};

use std::sync::Arc;
use tracing::warn;

/// Name of the document cache
pub const DOCUMENT_CACHE: &str = "documents";
/// Name of the result cache
pub const RESULT_CACHE: &str = "results";

/// The document and result caches of one pipeline
#[derive(Clone)]
pub struct Caches {
    pub documents: Arc<TwoTierCache>,
    pub results: Arc<TwoTierCache>,
}

impl Caches {
    pub fn new(documents: TwoTierCache, results: TwoTierCache) -> Self {
        Self {
            documents: Arc::new(documents),
            results: Arc::new(results),
        }
    }

    /// Memory-only caches (useful for testing).
    pub fn in_memory() -> Self {
        Self::new(
            TwoTierCache::in_memory(DOCUMENT_CACHE),
            TwoTierCache::in_memory(RESULT_CACHE),
        )
    }

    /// Close both caches. A cache still shared elsewhere is left open.
    pub async fn close(self) -> CacheResult<()> {
        for cache in [self.documents, self.results] {
            match Arc::try_unwrap(cache) {
                Ok(cache) => {
                    cache.close().await?;
                }
                Err(shared) => {
                    warn!(cache = %shared.name(), "cache still in use, not closing");
                }
            }
        }
        Ok(())
    }
}
