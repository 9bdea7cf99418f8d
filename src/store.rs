//! The store façade.
//!
//! A [`VectorStore`] owns named, isolated collections behind a
//! readers-writer lock and runs a background sweeper that asks every
//! collection to drop expired documents once a minute. Collections are
//! created lazily on first reference; later references return the same
//! instance.

use crate::collection::Collection;
use crate::config::CollectionConfig;
use crate::context::Context;
use crate::document::Document;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// How often the background sweeper wakes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Store-level statistics aggregated across collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of collections.
    pub collections: usize,
    /// Total documents across collections.
    pub documents: usize,
    /// Approximate bytes held across collections.
    pub storage_bytes: usize,
    /// Identifier of the backing implementation.
    pub provider: String,
    /// Crate version of the engine.
    pub version: String,
    /// Provider-specific extras.
    pub extras: HashMap<String, serde_json::Value>,
}

struct StoreInner {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// The in-memory document vector store.
///
/// Cloning is cheap and clones share state. All operations are
/// thread-safe: the collection map sits behind its own readers-writer
/// lock, and each collection serialises its mutations internally.
#[derive(Clone)]
pub struct VectorStore {
    inner: Arc<StoreInner>,
}

impl VectorStore {
    /// Create a store and spawn its expiry sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }

    /// Create a store with a custom sweep interval. Test hooks and
    /// aggressive-TTL deployments tighten the cycle.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(StoreInner {
            collections: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown,
            sweeper: Mutex::new(None),
        });

        let handle = tokio::spawn(run_sweeper(Arc::downgrade(&inner), interval, shutdown_rx));
        *inner.sweeper.lock() = Some(handle);

        info!(interval_secs = interval.as_secs(), "vector store opened");
        Self { inner }
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Get or lazily create a collection.
    ///
    /// A thin wrapper over [`VectorStore::create_or_open`]: the options
    /// only apply when the collection does not exist yet and are silently
    /// ignored otherwise. Use [`VectorStore::open`] when no options are
    /// intended.
    pub async fn collection(
        &self,
        ctx: &Context,
        name: &str,
        config: CollectionConfig,
    ) -> Result<Arc<Collection>> {
        self.create_or_open(ctx, name, config).await
    }

    /// Get or lazily create a collection with default policy.
    pub async fn open(&self, ctx: &Context, name: &str) -> Result<Arc<Collection>> {
        self.create_or_open(ctx, name, CollectionConfig::default())
            .await
    }

    /// Get an existing collection, or create it with the given policy.
    ///
    /// When the collection already exists the config is not applied; the
    /// existing instance and its original policy are returned.
    #[instrument(skip(self, ctx, config), fields(name))]
    pub async fn create_or_open(
        &self,
        ctx: &Context,
        name: &str,
        config: CollectionConfig,
    ) -> Result<Arc<Collection>> {
        self.check_open()?;
        ctx.check()?;
        if name.is_empty() {
            return Err(Error::InvalidConfiguration(
                "collection name must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.inner.collections.read().get(name) {
            return Ok(existing.clone());
        }

        let mut collections = self.inner.collections.write();
        // A racing creator may have won between the read and write locks.
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let collection = Arc::new(Collection::new(name, config)?);
        collections.insert(name.to_string(), collection.clone());
        info!(name, "collection created");
        Ok(collection)
    }

    /// Names of all collections, sorted lexicographically.
    pub async fn list_collections(&self, ctx: &Context) -> Result<Vec<String>> {
        self.check_open()?;
        ctx.check()?;
        let mut names: Vec<String> = self.inner.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Drop a collection and all its documents.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no collection has the given name.
    #[instrument(skip(self, ctx), fields(name))]
    pub async fn delete_collection(&self, ctx: &Context, name: &str) -> Result<()> {
        self.check_open()?;
        ctx.check()?;
        if self.inner.collections.write().remove(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        info!(name, "collection deleted");
        Ok(())
    }

    /// Aggregate statistics across all collections.
    pub async fn stats(&self, ctx: &Context) -> Result<StoreStats> {
        self.check_open()?;
        ctx.check()?;

        let collections: Vec<Arc<Collection>> =
            self.inner.collections.read().values().cloned().collect();

        let mut documents = 0usize;
        let mut storage_bytes = 0usize;
        for collection in &collections {
            let stats = collection.stats(ctx).await?;
            documents += stats.documents;
            storage_bytes += stats.storage_bytes;
        }

        Ok(StoreStats {
            collections: collections.len(),
            documents,
            storage_bytes,
            provider: "memory".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extras: HashMap::new(),
        })
    }

    /// Convenience: upsert documents into a named collection, creating it
    /// with default policy when absent.
    pub async fn upsert(
        &self,
        ctx: &Context,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<crate::collection::UpsertResult> {
        let collection = self.open(ctx, collection).await?;
        collection.upsert(ctx, docs).await
    }

    /// Stop the sweeper and refuse further operations.
    ///
    /// Idempotent; subsequent operations fail with [`Error::Closed`].
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(true);
        let handle = self.inner.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "sweeper task did not shut down cleanly");
            }
        }
        info!("vector store closed");
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The sweeper loop: wake on the interval, snapshot the collection set
/// under the shared lock, then run each collection's expiry scan without
/// holding the store lock. Failures are logged, never raised.
async fn run_sweeper(
    inner: Weak<StoreInner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so a fresh store does
    // not sweep before anything is stored.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("sweeper shutting down");
                    return;
                }
                continue;
            }
        }

        let Some(inner) = inner.upgrade() else {
            // Store dropped without close; nothing left to sweep.
            return;
        };
        let collections: Vec<Arc<Collection>> =
            inner.collections.read().values().cloned().collect();
        drop(inner);

        let ctx = Context::background();
        for collection in collections {
            match collection.sweep_expired(&ctx).await {
                Ok(0) => {}
                Ok(removed) => {
                    debug!(collection = %collection.name(), removed, "sweeper removed expired documents");
                }
                Err(err) => {
                    warn!(collection = %collection.name(), error = %err, "expiry sweep failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Embedding;
    use crate::query::Query;

    fn ctx() -> Context {
        Context::background()
    }

    #[tokio::test]
    async fn test_lazy_create_returns_same_instance() {
        let store = VectorStore::new();
        let first = store
            .collection(&ctx(), "docs", CollectionConfig::default())
            .await
            .unwrap();
        let second = store
            .collection(
                &ctx(),
                "docs",
                CollectionConfig::default().with_dimensions(123),
            )
            .await
            .unwrap();

        // Same instance; options on the second reference were ignored.
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.config().dimensions.is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let store = VectorStore::new();
        for name in ["zulu", "alpha", "mike"] {
            store.open(&ctx(), name).await.unwrap();
        }
        let names = store.list_collections(&ctx()).await.unwrap();
        assert_eq!(names, vec!["alpha", "mike", "zulu"]);
        store.close().await;
    }

    #[tokio::test]
    async fn test_delete_collection() {
        let store = VectorStore::new();
        store.open(&ctx(), "doomed").await.unwrap();
        store.delete_collection(&ctx(), "doomed").await.unwrap();
        assert!(matches!(
            store.delete_collection(&ctx(), "doomed").await,
            Err(Error::NotFound(_))
        ));
        store.close().await;
    }

    #[tokio::test]
    async fn test_stats_aggregates() {
        let store = VectorStore::new();
        store
            .upsert(
                &ctx(),
                "a",
                vec![Document::text("1", "x"), Document::text("2", "y")],
            )
            .await
            .unwrap();
        store
            .upsert(&ctx(), "b", vec![Document::text("3", "z")])
            .await
            .unwrap();

        let stats = store.stats(&ctx()).await.unwrap();
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.documents, 3);
        assert!(stats.storage_bytes > 0);
        assert_eq!(stats.provider, "memory");
        assert_eq!(stats.version, env!("CARGO_PKG_VERSION"));
        store.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let store = VectorStore::new();
        store.open(&ctx(), "docs").await.unwrap();
        store.close().await;
        store.close().await;

        assert!(matches!(
            store.open(&ctx(), "docs").await,
            Err(Error::Closed)
        ));
        assert!(matches!(
            store.list_collections(&ctx()).await,
            Err(Error::Closed)
        ));
        assert!(matches!(store.stats(&ctx()).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_empty_collection_name_rejected() {
        let store = VectorStore::new();
        assert!(matches!(
            store.open(&ctx(), "").await,
            Err(Error::InvalidConfiguration(_))
        ));
        store.close().await;
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_documents() {
        let store = VectorStore::with_sweep_interval(Duration::from_millis(100));
        let collection = store
            .collection(
                &ctx(),
                "ttl",
                CollectionConfig::default().with_ttl(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        collection
            .upsert(
                &ctx(),
                vec![Document::text("e", "hi")
                    .with_embedding(Embedding::new(vec![1.0, 0.0, 0.0], "m"))],
            )
            .await
            .unwrap();
        assert_eq!(collection.len(), 1);

        // Let the TTL elapse and give the sweeper at least two cycles.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let result = collection.query(&ctx(), &Query::new()).await.unwrap();
        assert_eq!(result.total, 0);
        store.close().await;
    }
}
