//! # vellum
//!
//! An embedded, in-memory document vector store for agentic retrieval:
//! named collections of documents carrying embeddings, answered by
//! brute-force similarity search combined with a composable filter algebra
//! over metadata, scope, tags, timestamps, and scores.
//!
//! ## Features
//!
//! - **Collections with policy**: TTL expiry, content-similarity
//!   deduplication, declared dimensionality, required scope fields, and
//!   oldest-first eviction under a document cap
//! - **Filter algebra**: `and`/`or`/`not` over field, tag, scope,
//!   temporal, and score predicates, with decomposition helpers for
//!   provider-native translation
//! - **Three normative metrics**: cosine, euclidean, and dot product
//!   (plus manhattan and hamming)
//! - **Batch ingestion**: batching, preparation parallelism, retries,
//!   progress callbacks, and cooperative cancellation
//! - **Pluggable embedding backends**: HTTP adapters for
//!   text-embeddings-inference servers and hosted inference APIs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vellum::{Context, CollectionConfig, Document, Embedding, Query, VectorStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vellum::Error> {
//!     let store = VectorStore::new();
//!     let ctx = Context::background();
//!
//!     let docs = store.open(&ctx, "documents").await?;
//!     docs.upsert(&ctx, vec![
//!         Document::text("a", "alpha")
//!             .with_embedding(Embedding::new(vec![1.0, 0.0, 0.0], "bge-small")),
//!     ]).await?;
//!
//!     let query = Query::new()
//!         .with_embedding(Embedding::new(vec![1.0, 0.0, 0.0], "bge-small"))
//!         .with_limit(10);
//!     let result = docs.query(&ctx, &query).await?;
//!     println!("best match: {}", result.matches[0].document.id);
//!
//!     store.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        VectorStore                          │
//! │   collection map (RwLock)      expiry sweeper (60s task)    │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Collection                         ││
//! │  │  ┌──────────────┐  ┌───────────────────────────────┐    ││
//! │  │  │ primary map  │  │ secondary indexes             │    ││
//! │  │  │ id → doc     │  │ scope · temporal · tag · hash │    ││
//! │  │  └──────────────┘  └───────────────────────────────┘    ││
//! │  │        one RwLock guards both as a unit                 ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │                                                             │
//! │  Embedder trait ──► TeiEmbedder │ InferenceApiEmbedder      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod config;
pub mod context;
pub mod distance;
pub mod document;
pub mod embed;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod query;
pub mod store;
pub mod stream;

mod batch;
mod index;

// Re-exports for convenience
pub use collection::{Collection, CollectionStats, DeleteResult, UpsertResult};
pub use config::{BatchConfig, CollectionConfig, IndexKind};
pub use context::Context;
pub use distance::{DistanceMetric, Similarity};
pub use document::{Content, Document, Embedding, Media, Scope, ScopeField, Temporal};
pub use embed::{Embedder, EmbedderProvider};
pub use error::{Error, Result};
pub use filter::{CompareOp, FieldOp, Filter, TemporalField};
pub use metadata::MetadataValue;
pub use query::{Match, Query, QueryResult, SortCriterion, SortDirection, SortKey};
pub use store::{StoreStats, VectorStore};
pub use stream::MatchStream;
