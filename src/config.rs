//! Pipeline configuration
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no
//! file) is a valid configuration:
//!
//! ```yaml
//! chunking:
//!   max_chars: 1500
//! analysis:
//!   mode: { kind: grouped, group_size: 4 }
//!   depth: comprehensive
//! cache:
//!   backend: sqlite
//! ```

use crate::analysis::{AnalysisSettings, RerankWeights};
use crate::cache::{
    CacheError, Caches, FileTier, PersistentTier, SqliteTier, TwoTierCache, DOCUMENT_CACHE,
    RESULT_CACHE,
};
use crate::context::ContextLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to open cache: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingSettings,
    pub context: ContextLimits,
    pub analysis: AnalysisSettings,
    pub rerank: RerankWeights,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Upper bound on a unit's length, in characters
    pub max_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_chars: 2000 }
    }
}

/// Where the persistent cache tier lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// No persistent tier
    Memory,
    /// One JSON file per key
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    /// Defaults to `<data dir>/meridian`
    pub dir: Option<PathBuf>,
}

/// `<data dir>/meridian`, falling back to `~/.local/share/meridian`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
        .join("meridian")
}

impl CacheSettings {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Open the document and result caches for this backend.
    pub async fn open_caches(&self) -> Result<Caches, ConfigError> {
        let dir = self.dir();
        let tiers: Option<(Arc<dyn PersistentTier>, Arc<dyn PersistentTier>)> = match self.backend {
            CacheBackend::Memory => None,
            CacheBackend::File => Some((
                Arc::new(FileTier::open(dir.join(DOCUMENT_CACHE)).await?),
                Arc::new(FileTier::open(dir.join(RESULT_CACHE)).await?),
            )),
            CacheBackend::Sqlite => {
                let path = dir.join("cache.db");
                Some((
                    Arc::new(SqliteTier::open(&path, DOCUMENT_CACHE)?),
                    Arc::new(SqliteTier::open(&path, RESULT_CACHE)?),
                ))
            }
        };
        let (documents, results) = match tiers {
            Some((documents, results)) => (Some(documents), Some(results)),
            None => (None, None),
        };
        Ok(Caches::new(
            TwoTierCache::open(DOCUMENT_CACHE, documents).await?,
            TwoTierCache::open(RESULT_CACHE, results).await?,
        ))
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}
