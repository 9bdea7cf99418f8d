//! Collection and batch ingestion policy.
//!
//! These types follow a builder style: construct with defaults, then chain
//! `with_*` methods. `validate()` runs when a collection is created or a
//! batch begins.

use crate::document::ScopeField;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default content-similarity threshold for deduplication.
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.99;

/// Default documents per ingestion batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default retry attempts for a failed batch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between batch retry attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Index kind
// ============================================================================

/// The index structure a collection uses for vector search.
///
/// Only [`IndexKind::Flat`] (brute force) is implemented; the remaining
/// variants are accepted as declarations for pluggable backends and resolve
/// to brute force in the in-memory engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exhaustive scan over every candidate.
    #[default]
    Flat,
    /// Hierarchical navigable small world graph.
    Hnsw,
    /// Inverted file index.
    Ivf,
    /// Backend picks based on collection size.
    Auto,
}

impl IndexKind {
    /// The canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Hnsw => "hnsw",
            IndexKind::Ivf => "ivf",
            IndexKind::Auto => "auto",
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Collection configuration
// ============================================================================

/// Per-collection policy, applied at creation.
///
/// Options presented for an already-existing collection are ignored by
/// `create_or_open`; use `open` when no options are intended.
#[derive(Clone)]
pub struct CollectionConfig {
    /// Documents ingested without an explicit expiry receive
    /// `expires_at = now + ttl`. `None` disables TTL stamping.
    pub ttl: Option<Duration>,
    /// Skip storing documents whose content hash matches an existing
    /// document with sufficiently similar embedding.
    pub enable_deduplication: bool,
    /// Cosine similarity at or above which a content-hash hit counts as a
    /// duplicate.
    pub deduplication_threshold: f32,
    /// Declared index structure.
    pub index_kind: IndexKind,
    /// Required embedding dimensionality. Documents with a different
    /// dimensionality are rejected. `None` accepts any.
    pub dimensions: Option<u32>,
    /// Scope fields every ingested document must carry (empty values count
    /// as missing).
    pub required_scope: Vec<ScopeField>,
    /// Maximum document count; zero means unbounded.
    pub max_documents: usize,
    /// When full, evict the oldest document instead of failing with
    /// `LimitExceeded`.
    pub evict_on_full: bool,
    /// Track a per-document revision counter across updates.
    pub enable_versioning: bool,
    /// Emit an info-level event for every mutation.
    pub enable_audit: bool,
    /// Embedder invoked for ingested documents that lack an embedding but
    /// carry textual content.
    pub embedder: Option<Arc<dyn Embedder>>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            enable_deduplication: false,
            deduplication_threshold: DEFAULT_DEDUP_THRESHOLD,
            index_kind: IndexKind::default(),
            dimensions: None,
            required_scope: Vec::new(),
            max_documents: 0,
            evict_on_full: true,
            enable_versioning: false,
            enable_audit: false,
            embedder: None,
        }
    }
}

impl std::fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("ttl", &self.ttl)
            .field("enable_deduplication", &self.enable_deduplication)
            .field("deduplication_threshold", &self.deduplication_threshold)
            .field("index_kind", &self.index_kind)
            .field("dimensions", &self.dimensions)
            .field("required_scope", &self.required_scope)
            .field("max_documents", &self.max_documents)
            .field("evict_on_full", &self.evict_on_full)
            .field("enable_versioning", &self.enable_versioning)
            .field("enable_audit", &self.enable_audit)
            .field(
                "embedder",
                &self.embedder.as_ref().map(|e| e.model_name().to_string()),
            )
            .finish()
    }
}

impl CollectionConfig {
    /// Defaults: no TTL, no dedup, flat index, unbounded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live applied to documents without explicit expiry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Enable deduplication at the default threshold.
    pub fn with_deduplication(mut self) -> Self {
        self.enable_deduplication = true;
        self
    }

    /// Enable deduplication at a custom similarity threshold.
    pub fn with_deduplication_threshold(mut self, threshold: f32) -> Self {
        self.enable_deduplication = true;
        self.deduplication_threshold = threshold;
        self
    }

    /// Declare the index structure.
    pub fn with_index_kind(mut self, kind: IndexKind) -> Self {
        self.index_kind = kind;
        self
    }

    /// Declare the required embedding dimensionality.
    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Require the given scope fields on every ingested document.
    pub fn with_required_scope(mut self, fields: impl IntoIterator<Item = ScopeField>) -> Self {
        self.required_scope = fields.into_iter().collect();
        self
    }

    /// Cap the document count, evicting oldest-first when full.
    pub fn with_max_documents(mut self, max: usize) -> Self {
        self.max_documents = max;
        self
    }

    /// Fail ingestion with `LimitExceeded` instead of evicting when full.
    pub fn with_strict_capacity(mut self) -> Self {
        self.evict_on_full = false;
        self
    }

    /// Track per-document revisions.
    pub fn with_versioning(mut self) -> Self {
        self.enable_versioning = true;
        self
    }

    /// Log every mutation at info level.
    pub fn with_audit(mut self) -> Self {
        self.enable_audit = true;
        self
    }

    /// Auto-embed ingested documents lacking an embedding.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.enable_deduplication
            && !(self.deduplication_threshold > 0.0 && self.deduplication_threshold <= 1.0)
        {
            return Err(Error::InvalidConfiguration(format!(
                "deduplication_threshold {} outside (0, 1]",
                self.deduplication_threshold
            )));
        }
        if self.dimensions == Some(0) {
            return Err(Error::InvalidConfiguration(
                "dimensions must be greater than zero when declared".to_string(),
            ));
        }
        if let Some(ttl) = self.ttl {
            if ttl.is_zero() {
                return Err(Error::InvalidConfiguration(
                    "ttl must be greater than zero when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Batch configuration
// ============================================================================

/// Callback invoked after each completed batch with
/// `(processed_documents, total_documents)`.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Policy for batched ingestion.
#[derive(Clone)]
pub struct BatchConfig {
    /// Documents per batch.
    pub batch_size: usize,
    /// Concurrent batch preparation. Mutations always serialise through the
    /// collection's write lock, so this bounds validation and embedding
    /// work only, not mutation interleaving.
    pub parallelism: usize,
    /// Keep processing after a batch fails, accumulating its documents into
    /// the failed counters. When false the first error aborts.
    pub continue_on_error: bool,
    /// Validate every document up front and abort before any write when one
    /// is invalid.
    pub validate_before_batch: bool,
    /// Retry attempts for a failed batch.
    pub max_retries: u32,
    /// Delay between retry attempts.
    pub retry_delay: Duration,
    /// Invoked once per completed batch.
    pub progress: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: 1,
            continue_on_error: true,
            validate_before_batch: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            progress: None,
        }
    }
}

impl std::fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchConfig")
            .field("batch_size", &self.batch_size)
            .field("parallelism", &self.parallelism)
            .field("continue_on_error", &self.continue_on_error)
            .field("validate_before_batch", &self.validate_before_batch)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl BatchConfig {
    /// Defaults: batches of 100, sequential, continue on error, three
    /// retries one second apart.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the preparation parallelism.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Abort on the first failed batch.
    pub fn with_fail_fast(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    /// Validate every document before writing anything.
    pub fn with_upfront_validation(mut self) -> Self {
        self.validate_before_batch = true;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set the progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(Error::InvalidConfiguration(
                "parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_defaults() {
        let config = CollectionConfig::default();
        assert!(config.ttl.is_none());
        assert!(!config.enable_deduplication);
        assert_eq!(config.deduplication_threshold, DEFAULT_DEDUP_THRESHOLD);
        assert_eq!(config.index_kind, IndexKind::Flat);
        assert_eq!(config.max_documents, 0);
        assert!(config.evict_on_full);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collection_validation() {
        assert!(CollectionConfig::new()
            .with_deduplication_threshold(0.0)
            .validate()
            .is_err());
        assert!(CollectionConfig::new()
            .with_deduplication_threshold(1.5)
            .validate()
            .is_err());
        assert!(CollectionConfig::new()
            .with_deduplication_threshold(0.95)
            .validate()
            .is_ok());

        let mut config = CollectionConfig::new();
        config.dimensions = Some(0);
        assert!(config.validate().is_err());

        let mut config = CollectionConfig::new();
        config.ttl = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.parallelism, 1);
        assert!(config.continue_on_error);
        assert!(!config.validate_before_batch);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry_delay, DEFAULT_RETRY_DELAY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_validation() {
        assert!(BatchConfig::new().with_batch_size(0).validate().is_err());
        assert!(BatchConfig::new().with_parallelism(0).validate().is_err());
    }
}
