//! The collection engine.
//!
//! A [`Collection`] is a named container for documents with per-collection
//! policy: TTL stamping, content-similarity deduplication, declared
//! dimensionality, required scope fields, and a document cap. A single
//! readers-writer lock guards the primary store and every secondary index
//! as one unit: queries take the shared side, mutations and expiry scans
//! take the exclusive side, and a query therefore never observes a partial
//! upsert.
//!
//! Within one upsert call documents apply in input order; concurrent calls
//! serialise on the write lock in an unspecified but per-call-atomic order.
//! Validation runs before the lock is taken, so a rejected call mutates
//! nothing. A collection removed from its store simply stops being
//! reachable through it; holders of the `Arc` can finish in-flight work.

use crate::config::{CollectionConfig, IndexKind};
use crate::context::Context;
use crate::distance::DistanceMetric;
use crate::document::{Content, Document, Embedding};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::index::{content_hash, SecondaryIndexes};
use crate::query::{
    ExplainStep, Match, Query, QueryExplain, QueryResult, QueryTiming, SortCriterion,
    SortDirection, SortKey,
};
use crate::stream::{ErrorStream, MatchStream, SliceStream};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ============================================================================
// Results
// ============================================================================

/// The outcome of an upsert or batched upsert.
#[derive(Debug, Default)]
pub struct UpsertResult {
    /// Documents stored under a new id.
    pub inserted: usize,
    /// Documents that replaced an existing id.
    pub updated: usize,
    /// Documents skipped as near-duplicates of stored content.
    pub deduplicated: usize,
    /// Ids of the skipped duplicates, in input order.
    pub deduplicated_ids: Vec<String>,
    /// Documents that could not be stored.
    pub failed: usize,
    /// Ids of the failed documents, in input order.
    pub failed_ids: Vec<String>,
    /// The per-document and per-batch errors behind `failed`.
    pub errors: Vec<Error>,
    /// Wall-clock duration of the operation.
    pub timing: Duration,
}

impl UpsertResult {
    /// Fold another result into this one, keeping the larger timing.
    pub(crate) fn merge(&mut self, other: UpsertResult) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deduplicated += other.deduplicated;
        self.deduplicated_ids.extend(other.deduplicated_ids);
        self.failed += other.failed;
        self.failed_ids.extend(other.failed_ids);
        self.errors.extend(other.errors);
    }
}

/// The outcome of a delete or delete-by-filter.
#[derive(Debug, Default)]
pub struct DeleteResult {
    /// Documents actually removed.
    pub deleted: usize,
    /// Requested ids that were not present.
    pub not_found: usize,
    /// The missing ids, in input order.
    pub not_found_ids: Vec<String>,
    /// Wall-clock duration of the operation.
    pub timing: Duration,
}

/// A snapshot of collection-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of stored documents.
    pub documents: usize,
    /// Approximate bytes held: ids, content, vectors, tags, and metadata.
    pub storage_bytes: usize,
    /// Declared dimensionality, or that of the first stored embedding.
    pub embedding_dimensions: Option<u32>,
    /// Declared index structure.
    pub index_kind: IndexKind,
    /// When the collection was created.
    pub created_at: DateTime<Utc>,
    /// When the collection was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Provider-specific extras.
    pub extras: HashMap<String, serde_json::Value>,
}

// ============================================================================
// Collection
// ============================================================================

struct CollectionState {
    documents: HashMap<String, Document>,
    /// First-insertion order, for oldest-first eviction.
    insertion_order: VecDeque<String>,
    indexes: SecondaryIndexes,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revision: u64,
}

/// A named, isolated namespace owning documents, indexes, and policy.
pub struct Collection {
    name: String,
    config: CollectionConfig,
    state: RwLock<CollectionState>,
}

impl Collection {
    /// Create an empty collection with the given policy.
    pub fn new(name: impl Into<String>, config: CollectionConfig) -> Result<Self> {
        config.validate()?;
        let now = Utc::now();
        Ok(Self {
            name: name.into(),
            config,
            state: RwLock::new(CollectionState {
                documents: HashMap::new(),
                insertion_order: VecDeque::new(),
                indexes: SecondaryIndexes::new(),
                created_at: now,
                updated_at: now,
                revision: 0,
            }),
        })
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy the collection was created with.
    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    /// True when no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when a document with the given id is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().documents.contains_key(id)
    }

    // ------------------------------------------------------------------
    // Upsert
    // ------------------------------------------------------------------

    /// Validate and store documents, replacing prior ids.
    ///
    /// Validation (field rules, dimension policy, required scope) runs
    /// before the write lock is taken; a failure rejects the whole call
    /// with no mutation. Documents then apply in input order: temporal
    /// stamps are assigned, duplicates are skipped when deduplication is
    /// on, and the primary store plus every secondary index update
    /// together.
    pub async fn upsert(&self, ctx: &Context, mut docs: Vec<Document>) -> Result<UpsertResult> {
        let start = Instant::now();
        ctx.check()?;

        for (index, doc) in docs.iter().enumerate() {
            doc.validate(index)?;
            self.check_dimension_policy(doc)?;
            self.check_required_scope(doc)?;
        }

        // Auto-embedding happens outside the lock; it may block on I/O.
        if let Some(embedder) = &self.config.embedder {
            for doc in &mut docs {
                if doc.embedding.is_none() {
                    let text = doc.content.textual();
                    if !text.is_empty() {
                        let vector = embedder.embed(ctx, &text).await?;
                        doc.embedding = Some(Embedding::new(vector, embedder.model_name()));
                    }
                }
            }
            ctx.check()?;
        }

        let mut result = UpsertResult::default();
        {
            let mut state = self.state.write();
            let now = Utc::now();
            for doc in docs {
                self.apply_one(&mut state, doc, now, &mut result);
            }
            state.updated_at = now;
        }

        result.timing = start.elapsed();
        debug!(
            collection = %self.name,
            inserted = result.inserted,
            updated = result.updated,
            deduplicated = result.deduplicated,
            failed = result.failed,
            "upsert completed"
        );
        Ok(result)
    }

    fn apply_one(
        &self,
        state: &mut CollectionState,
        mut doc: Document,
        now: DateTime<Utc>,
        result: &mut UpsertResult,
    ) {
        // Transient query fields are never persisted.
        doc.score = None;
        doc.distance = None;

        if self.config.enable_deduplication {
            let hash = content_hash(&doc);
            let existing_id = state.indexes.id_for_hash(&hash).map(str::to_string);
            if let Some(existing_id) = existing_id {
                if existing_id != doc.id {
                    if let Some(existing) = state.documents.get(&existing_id) {
                        if self.is_duplicate(existing, &doc) {
                            result.deduplicated += 1;
                            result.deduplicated_ids.push(doc.id);
                            return;
                        }
                    }
                }
            }
        }

        let mut temporal = doc.temporal.take().unwrap_or_default();
        if temporal.created_at.is_none() {
            temporal.created_at = Some(now);
        }
        temporal.updated_at = Some(now);
        if temporal.expires_at.is_none() {
            if let Some(ttl) = self.config.ttl.and_then(|d| chrono::Duration::from_std(d).ok()) {
                temporal.expires_at = Some(now + ttl);
            }
        }
        doc.temporal = Some(temporal);

        let replacing = state.documents.contains_key(&doc.id);
        if !replacing
            && self.config.max_documents > 0
            && state.documents.len() >= self.config.max_documents
        {
            if self.config.evict_on_full {
                while state.documents.len() >= self.config.max_documents {
                    let Some(oldest) = state.insertion_order.pop_front() else {
                        break;
                    };
                    // The order queue may hold ids deleted out of band.
                    if let Some(evicted) = state.documents.remove(&oldest) {
                        state
                            .indexes
                            .remove(&evicted, self.config.enable_deduplication);
                        debug!(collection = %self.name, id = %oldest, "evicted oldest document");
                    }
                }
            } else {
                result.failed += 1;
                result.failed_ids.push(doc.id.clone());
                result.errors.push(Error::LimitExceeded {
                    limit: self.config.max_documents,
                });
                return;
            }
        }

        if let Some(prior) = state.documents.remove(&doc.id) {
            state.indexes.remove(&prior, self.config.enable_deduplication);
            result.updated += 1;
        } else {
            state.insertion_order.push_back(doc.id.clone());
            result.inserted += 1;
        }

        let hash = self
            .config
            .enable_deduplication
            .then(|| content_hash(&doc));
        state.indexes.insert(&doc, hash);
        if self.config.enable_versioning {
            state.revision += 1;
        }
        if self.config.enable_audit {
            info!(collection = %self.name, id = %doc.id, "document upserted");
        }
        state.documents.insert(doc.id.clone(), doc);
    }

    fn is_duplicate(&self, existing: &Document, incoming: &Document) -> bool {
        match (&existing.embedding, &incoming.embedding) {
            (Some(a), Some(b)) => DistanceMetric::Cosine
                .compare(&a.vector, &b.vector)
                .is_some_and(|sim| sim.score >= self.config.deduplication_threshold),
            // A bare hash hit is only trusted when the stored text really
            // is identical, so a hash collision cannot swallow a document.
            _ => existing.content.textual() == incoming.content.textual(),
        }
    }

    fn check_dimension_policy(&self, doc: &Document) -> Result<()> {
        if let (Some(expected), Some(embedding)) = (self.config.dimensions, &doc.embedding) {
            if embedding.dimensions != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: embedding.dimensions,
                });
            }
        }
        Ok(())
    }

    fn check_required_scope(&self, doc: &Document) -> Result<()> {
        for field in &self.config.required_scope {
            let present = doc
                .scope
                .as_ref()
                .and_then(|scope| scope.field(*field))
                .is_some();
            if !present {
                return Err(Error::MissingRequiredScope {
                    field: field.as_str(),
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    /// Run a similarity query.
    ///
    /// The filter tree selects candidates, each candidate with an
    /// embedding is scored under the query metric, matches sort by score
    /// descending with secondary sort keys breaking ties, and the ranked
    /// window `offset..offset+limit` is returned. Without a query
    /// embedding every candidate scores 1.0.
    pub async fn query(&self, ctx: &Context, query: &Query) -> Result<QueryResult> {
        let start = Instant::now();
        query.validate()?;
        ctx.check()?;

        let state = self.state.read();
        let scanned = state.documents.len();

        let filter_start = Instant::now();
        let candidates: Vec<&Document> = match &query.filter {
            None => state.documents.values().collect(),
            Some(filter) => match state.indexes.candidates(filter) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| state.documents.get(id))
                    .collect(),
                None => state
                    .documents
                    .values()
                    .filter(|doc| filter.matches(doc))
                    .collect(),
            },
        };
        let filter_application = filter_start.elapsed();
        let filtered = candidates.len();

        // Cancellation is observed before the scoring pass, never inside it.
        ctx.check()?;

        let scoring_start = Instant::now();
        let mut vector_search = Duration::ZERO;
        let mut vector_comparisons = 0usize;
        let score_filter = query
            .filter
            .as_ref()
            .filter(|filter| filter.has_score_predicates());

        struct Scored<'a> {
            doc: &'a Document,
            score: f32,
            distance: f32,
        }

        let mut scored: Vec<Scored<'_>> = Vec::with_capacity(candidates.len());
        if let Some(query_embedding) = &query.embedding {
            for doc in candidates {
                let Some(embedding) = &doc.embedding else {
                    continue;
                };
                let compare_start = Instant::now();
                let similarity = query
                    .metric
                    .compare(&query_embedding.vector, &embedding.vector);
                vector_search += compare_start.elapsed();
                let Some(similarity) = similarity else {
                    // Mismatched dimensionality is skipped, not an error.
                    continue;
                };
                vector_comparisons += 1;
                if query.min_score > 0.0 && similarity.score < query.min_score {
                    continue;
                }
                if let Some(filter) = score_filter {
                    if !filter.matches_scored(doc, similarity.score) {
                        continue;
                    }
                }
                scored.push(Scored {
                    doc,
                    score: similarity.score,
                    distance: similarity.distance,
                });
            }
        } else {
            for doc in candidates {
                if let Some(filter) = score_filter {
                    if !filter.matches_scored(doc, 1.0) {
                        continue;
                    }
                }
                scored.push(Scored {
                    doc,
                    score: 1.0,
                    distance: 0.0,
                });
            }
        }

        scored.sort_by(|a, b| {
            match b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal) {
                Ordering::Equal => {
                    compare_by_criteria(a.doc, a.score, b.doc, b.score, &query.sort_by)
                }
                other => other,
            }
        });
        let scoring = scoring_start.elapsed();

        let total = scored.len();
        let retrieval_start = Instant::now();
        let matches: Vec<Match> = scored
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .enumerate()
            .map(|(position, entry)| {
                let mut document = entry.doc.clone();
                if !query.include_embeddings {
                    document.embedding = None;
                }
                if !query.include_metadata {
                    document.metadata.clear();
                }
                if !query.include_content {
                    document.content = Content::Text {
                        text: String::new(),
                        chunks: Vec::new(),
                    };
                }
                document.score = Some(entry.score);
                document.distance = Some(entry.distance);
                Match {
                    document,
                    score: entry.score,
                    distance: entry.distance,
                    rank: query.offset + position + 1,
                }
            })
            .collect();
        let retrieval = retrieval_start.elapsed();
        drop(state);

        let timing = QueryTiming {
            total: start.elapsed(),
            filter_application,
            scoring,
            retrieval,
            vector_search,
        };
        let explain = query.explain.then(|| QueryExplain {
            strategy: "brute_force".to_string(),
            scanned_documents: scanned,
            filtered_documents: filtered,
            vector_comparisons,
            steps: vec![
                ExplainStep {
                    name: "filter_application".to_string(),
                    duration: filter_application,
                },
                ExplainStep {
                    name: "scoring".to_string(),
                    duration: scoring,
                },
                ExplainStep {
                    name: "retrieval".to_string(),
                    duration: retrieval,
                },
            ],
        });

        Ok(QueryResult {
            matches,
            total,
            offset: query.offset,
            limit: query.limit,
            timing,
            explain,
        })
    }

    /// Run a query and expose the results as a pull stream.
    ///
    /// The in-memory engine materialises the full result; failures are
    /// carried by the stream's `error()` rather than a `Result`.
    pub async fn query_stream(&self, ctx: &Context, query: &Query) -> Box<dyn MatchStream> {
        match self.query(ctx, query).await {
            Ok(result) => Box::new(SliceStream::new(result.matches)),
            Err(err) => Box::new(ErrorStream::new(err)),
        }
    }

    // ------------------------------------------------------------------
    // Point reads and deletes
    // ------------------------------------------------------------------

    /// Fetch documents by id. Missing ids are silently omitted and order
    /// is not guaranteed to follow the input.
    pub async fn get(&self, ctx: &Context, ids: &[&str]) -> Result<Vec<Document>> {
        ctx.check()?;
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.documents.get(*id).cloned())
            .collect())
    }

    /// Delete documents by id, purging every index entry.
    pub async fn delete(&self, ctx: &Context, ids: &[&str]) -> Result<DeleteResult> {
        let start = Instant::now();
        ctx.check()?;

        let mut result = DeleteResult::default();
        {
            let mut state = self.state.write();
            let mut removed: HashSet<String> = HashSet::new();
            for id in ids {
                match state.documents.remove(*id) {
                    Some(doc) => {
                        state.indexes.remove(&doc, self.config.enable_deduplication);
                        removed.insert(doc.id);
                        result.deleted += 1;
                        if self.config.enable_audit {
                            info!(collection = %self.name, id = %id, "document deleted");
                        }
                    }
                    None => {
                        result.not_found += 1;
                        result.not_found_ids.push((*id).to_string());
                    }
                }
            }
            if !removed.is_empty() {
                state.insertion_order.retain(|id| !removed.contains(id));
                state.updated_at = Utc::now();
                if self.config.enable_versioning {
                    state.revision += 1;
                }
            }
        }

        result.timing = start.elapsed();
        Ok(result)
    }

    /// Delete every document matching the filter.
    pub async fn delete_by_filter(&self, ctx: &Context, filter: &Filter) -> Result<DeleteResult> {
        let start = Instant::now();
        ctx.check()?;

        let mut result = DeleteResult::default();
        {
            let mut state = self.state.write();
            let matching: Vec<String> = state
                .documents
                .values()
                .filter(|doc| filter.matches(doc))
                .map(|doc| doc.id.clone())
                .collect();

            let mut removed: HashSet<String> = HashSet::new();
            for id in matching {
                if let Some(doc) = state.documents.remove(&id) {
                    state.indexes.remove(&doc, self.config.enable_deduplication);
                    removed.insert(id);
                    result.deleted += 1;
                }
            }
            if !removed.is_empty() {
                state.insertion_order.retain(|id| !removed.contains(id));
                state.updated_at = Utc::now();
                if self.config.enable_versioning {
                    state.revision += 1;
                }
                if self.config.enable_audit {
                    info!(collection = %self.name, deleted = result.deleted, "documents deleted by filter");
                }
            }
        }

        result.timing = start.elapsed();
        Ok(result)
    }

    /// Count documents, optionally restricted by a filter.
    pub async fn count(&self, ctx: &Context, filter: Option<&Filter>) -> Result<u64> {
        ctx.check()?;
        let state = self.state.read();
        let count = match filter {
            None => state.documents.len() as u64,
            Some(filter) => state
                .documents
                .values()
                .filter(|doc| filter.matches(doc))
                .count() as u64,
        };
        Ok(count)
    }

    /// Remove every document and reset all indexes.
    pub async fn clear(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.write();
        state.documents.clear();
        state.insertion_order.clear();
        state.indexes.clear();
        state.updated_at = Utc::now();
        if self.config.enable_audit {
            info!(collection = %self.name, "collection cleared");
        }
        Ok(())
    }

    /// Collection-level statistics.
    pub async fn stats(&self, ctx: &Context) -> Result<CollectionStats> {
        ctx.check()?;
        let state = self.state.read();
        let storage_bytes = state
            .documents
            .values()
            .map(Document::approximate_size)
            .sum();
        let embedding_dimensions = self.config.dimensions.or_else(|| {
            state
                .documents
                .values()
                .find_map(|doc| doc.embedding.as_ref().map(|e| e.dimensions))
        });

        let mut extras = HashMap::new();
        if self.config.enable_versioning {
            extras.insert(
                "revision".to_string(),
                serde_json::Value::from(state.revision),
            );
        }

        Ok(CollectionStats {
            name: self.name.clone(),
            documents: state.documents.len(),
            storage_bytes,
            embedding_dimensions,
            index_kind: self.config.index_kind,
            created_at: state.created_at,
            updated_at: state.updated_at,
            extras,
        })
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    /// Remove documents whose `expires_at` has passed.
    ///
    /// Runs under the exclusive section; the store's sweeper calls this
    /// every cycle, and callers may trigger it directly. Returns the
    /// number of documents removed.
    pub async fn sweep_expired(&self, ctx: &Context) -> Result<usize> {
        ctx.check()?;
        let now = Utc::now();
        let mut removed_count = 0usize;
        {
            let mut state = self.state.write();
            let candidates = state.indexes.expiry_candidates(now);
            let mut removed: HashSet<String> = HashSet::new();
            for id in candidates {
                let expired = state
                    .documents
                    .get(&id)
                    .and_then(|doc| doc.temporal.as_ref())
                    .is_some_and(|temporal| temporal.is_expired(now));
                if expired {
                    if let Some(doc) = state.documents.remove(&id) {
                        state.indexes.remove(&doc, self.config.enable_deduplication);
                        removed.insert(id);
                        removed_count += 1;
                    }
                }
            }
            if !removed.is_empty() {
                state.insertion_order.retain(|id| !removed.contains(id));
                state.updated_at = now;
                if self.config.enable_audit {
                    info!(collection = %self.name, removed = removed_count, "expired documents swept");
                }
            }
        }

        if removed_count > 0 {
            debug!(collection = %self.name, removed = removed_count, "expiry scan removed documents");
        }
        Ok(removed_count)
    }

    #[cfg(test)]
    pub(crate) fn assert_indexes_consistent(&self) {
        let state = self.state.read();
        assert!(state
            .indexes
            .is_consistent_with(&state.documents, self.config.enable_deduplication));
    }
}

// ============================================================================
// Sorting
// ============================================================================

enum SortValue {
    Num(f64),
    Str(String),
    Time(DateTime<Utc>),
}

fn sort_value(doc: &Document, score: f32, key: &SortKey) -> Option<SortValue> {
    match key {
        SortKey::Score => Some(SortValue::Num(score as f64)),
        SortKey::Metadata(name) => {
            let value = doc.metadata.get(name)?;
            if let Some(num) = value.as_f64() {
                Some(SortValue::Num(num))
            } else {
                value.as_str().map(|s| SortValue::Str(s.to_string()))
            }
        }
        SortKey::Temporal(field) => {
            let temporal = doc.temporal.as_ref()?;
            use crate::filter::TemporalField::*;
            match field {
                CreatedAt => temporal.created_at,
                UpdatedAt => temporal.updated_at,
                ExpiresAt => temporal.expires_at,
                EventTime => temporal.event_time,
                ValidFrom => temporal.valid_from,
                ValidUntil => temporal.valid_until,
            }
            .map(SortValue::Time)
        }
    }
}

fn compare_sort_values(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Num(x), SortValue::Num(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SortValue::Str(x), SortValue::Str(y)) => x.cmp(y),
        (SortValue::Time(x), SortValue::Time(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn compare_by_criteria(
    a_doc: &Document,
    a_score: f32,
    b_doc: &Document,
    b_score: f32,
    criteria: &[SortCriterion],
) -> Ordering {
    for criterion in criteria {
        let a = sort_value(a_doc, a_score, &criterion.key);
        let b = sort_value(b_doc, b_score, &criterion.key);
        let ordering = match (a, b) {
            (Some(a), Some(b)) => compare_sort_values(&a, &b),
            // Documents carrying the key sort ahead of those missing it.
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match criterion.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Scope, ScopeField, Temporal};

    fn embedded(id: &str, text: &str, vector: Vec<f32>) -> Document {
        Document::text(id, text).with_embedding(Embedding::new(vector, "m"))
    }

    fn ctx() -> Context {
        Context::background()
    }

    #[tokio::test]
    async fn test_upsert_then_get_round_trip() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        let doc = embedded("a", "alpha", vec![1.0, 0.0, 0.0])
            .with_tag("keep")
            .with_metadata("category", "A");

        let result = collection.upsert(&ctx(), vec![doc.clone()]).await.unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.updated, 0);

        let fetched = collection.get(&ctx(), &["a", "missing"]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        let stored = &fetched[0];
        assert_eq!(stored.id, "a");
        assert_eq!(stored.tags, vec!["keep".to_string()]);
        // Engine-assigned stamps are the only difference from the input.
        let temporal = stored.temporal.as_ref().unwrap();
        assert!(temporal.created_at.is_some());
        assert!(temporal.updated_at.unwrap() >= temporal.created_at.unwrap());
        collection.assert_indexes_consistent();
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_id() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        let doc = embedded("a", "alpha", vec![1.0, 0.0, 0.0]);

        collection.upsert(&ctx(), vec![doc.clone()]).await.unwrap();
        let second = collection.upsert(&ctx(), vec![doc]).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(collection.len(), 1);

        let stored = &collection.get(&ctx(), &["a"]).await.unwrap()[0];
        let temporal = stored.temporal.as_ref().unwrap();
        assert!(temporal.updated_at.unwrap() >= temporal.created_at.unwrap());
    }

    #[tokio::test]
    async fn test_validation_failure_mutates_nothing() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        let good = embedded("good", "x", vec![1.0]);
        let bad = embedded("bad/id", "y", vec![1.0]);

        let err = collection.upsert(&ctx(), vec![good, bad]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDocument { index: 1, .. }));
        assert_eq!(collection.len(), 0);
    }

    #[tokio::test]
    async fn test_dimension_policy() {
        let collection = Collection::new(
            "test",
            CollectionConfig::default().with_dimensions(3),
        )
        .unwrap();

        let wrong = embedded("a", "x", vec![1.0, 0.0]);
        let err = collection.upsert(&ctx(), vec![wrong]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        // Documents without embeddings are not constrained.
        let plain = Document::text("b", "no vector");
        assert!(collection.upsert(&ctx(), vec![plain]).await.is_ok());
    }

    #[tokio::test]
    async fn test_required_scope() {
        let collection = Collection::new(
            "test",
            CollectionConfig::default()
                .with_required_scope([ScopeField::Tenant, ScopeField::User]),
        )
        .unwrap();

        let doc = Document::text("x", "hi").with_scope(Scope::new().with_tenant("t"));
        let err = collection.upsert(&ctx(), vec![doc]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MissingRequiredScope { field: "user" }
        ));
        assert_eq!(collection.len(), 0);

        // An empty string counts as missing.
        let doc = Document::text("x", "hi")
            .with_scope(Scope::new().with_tenant("t").with_user(""));
        assert!(collection.upsert(&ctx(), vec![doc]).await.is_err());
    }

    #[tokio::test]
    async fn test_deduplication() {
        let collection = Collection::new(
            "test",
            CollectionConfig::default().with_deduplication_threshold(0.95),
        )
        .unwrap();

        let p = embedded("p", "hello", vec![1.0, 0.0, 0.0]);
        let q = embedded("q", "hello", vec![1.0, 0.0, 0.0]);
        let mut result = collection.upsert(&ctx(), vec![p]).await.unwrap();
        result.merge(collection.upsert(&ctx(), vec![q]).await.unwrap());

        assert_eq!(result.inserted, 1);
        assert_eq!(result.deduplicated, 1);
        assert_eq!(result.deduplicated_ids, vec!["q".to_string()]);
        assert_eq!(collection.len(), 1);
        collection.assert_indexes_consistent();
    }

    #[tokio::test]
    async fn test_dedup_requires_similarity() {
        // Same text but a dissimilar vector must not deduplicate.
        let collection = Collection::new(
            "test",
            CollectionConfig::default().with_deduplication_threshold(0.99),
        )
        .unwrap();

        let p = embedded("p", "hello", vec![1.0, 0.0, 0.0]);
        let q = embedded("q", "hello", vec![0.0, 1.0, 0.0]);
        collection.upsert(&ctx(), vec![p]).await.unwrap();
        let result = collection.upsert(&ctx(), vec![q]).await.unwrap();
        assert_eq!(result.deduplicated, 0);
        assert_eq!(collection.len(), 2);
    }

    #[tokio::test]
    async fn test_fifo_eviction() {
        let collection = Collection::new(
            "test",
            CollectionConfig::default().with_max_documents(2),
        )
        .unwrap();

        for id in ["a", "b", "c"] {
            collection
                .upsert(&ctx(), vec![Document::text(id, id)])
                .await
                .unwrap();
        }
        assert_eq!(collection.len(), 2);
        assert!(!collection.contains("a"));
        assert!(collection.contains("b"));
        assert!(collection.contains("c"));
    }

    #[tokio::test]
    async fn test_strict_capacity() {
        let collection = Collection::new(
            "test",
            CollectionConfig::default()
                .with_max_documents(1)
                .with_strict_capacity(),
        )
        .unwrap();

        collection
            .upsert(&ctx(), vec![Document::text("a", "x")])
            .await
            .unwrap();
        let result = collection
            .upsert(&ctx(), vec![Document::text("b", "y")])
            .await
            .unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.failed_ids, vec!["b".to_string()]);
        assert!(matches!(result.errors[0], Error::LimitExceeded { limit: 1 }));
        assert_eq!(collection.len(), 1);
    }

    #[tokio::test]
    async fn test_query_basic_recall() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    embedded("a", "alpha", vec![1.0, 0.0, 0.0]),
                    embedded("b", "beta", vec![0.0, 1.0, 0.0]),
                    embedded("c", "gamma", vec![0.9, 0.1, 0.0]),
                ],
            )
            .await
            .unwrap();

        let query = Query::new()
            .with_embedding(Embedding::new(vec![1.0, 0.0, 0.0], "m"))
            .with_limit(2);
        let result = collection.query(&ctx(), &query).await.unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].document.id, "a");
        assert!((result.matches[0].score - 1.0).abs() < 1e-5);
        assert_eq!(result.matches[1].document.id, "c");
        assert!((result.matches[1].score - 0.994).abs() < 1e-3);
        assert_eq!(result.matches[0].rank, 1);
        assert_eq!(result.matches[1].rank, 2);
    }

    #[tokio::test]
    async fn test_query_offset_and_ranks() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    embedded("a", "a", vec![1.0, 0.0]),
                    embedded("b", "b", vec![0.9, 0.1]),
                    embedded("c", "c", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let query = Query::new()
            .with_embedding(Embedding::new(vec![1.0, 0.0], "m"))
            .with_offset(1)
            .with_limit(10);
        let result = collection.query(&ctx(), &query).await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].rank, 2);

        // Offset beyond the result set yields no matches but a true total.
        let query = query.with_offset(10);
        let result = collection.query(&ctx(), &query).await.unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.total, 3);
    }

    #[tokio::test]
    async fn test_query_without_embedding_scores_one() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(&ctx(), vec![Document::text("a", "x").with_tag("keep")])
            .await
            .unwrap();

        let result = collection
            .query(&ctx(), &Query::new().with_filter(Filter::tag("keep")))
            .await
            .unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].score, 1.0);
        assert_eq!(result.matches[0].distance, 0.0);
    }

    #[tokio::test]
    async fn test_query_skips_mismatched_dimensions() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    embedded("fits", "x", vec![1.0, 0.0]),
                    embedded("wrong", "y", vec![1.0, 0.0, 0.0]),
                    Document::text("bare", "z"),
                ],
            )
            .await
            .unwrap();

        let query = Query::new().with_embedding(Embedding::new(vec![1.0, 0.0], "m"));
        let result = collection.query(&ctx(), &query).await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].document.id, "fits");
    }

    #[tokio::test]
    async fn test_query_explain() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    embedded("a", "x", vec![1.0, 0.0]).with_tag("keep"),
                    embedded("b", "y", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let query = Query::new()
            .with_embedding(Embedding::new(vec![1.0, 0.0], "m"))
            .with_filter(Filter::tag("keep"))
            .with_explain();
        let result = collection.query(&ctx(), &query).await.unwrap();
        let explain = result.explain.unwrap();
        assert_eq!(explain.strategy, "brute_force");
        assert_eq!(explain.scanned_documents, 2);
        assert_eq!(explain.filtered_documents, 1);
        assert_eq!(explain.vector_comparisons, 1);
        assert_eq!(explain.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_secondary_sort_keys() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    embedded("b", "x", vec![1.0, 0.0]).with_metadata("rank", 2i64),
                    embedded("a", "y", vec![1.0, 0.0]).with_metadata("rank", 1i64),
                    embedded("c", "z", vec![1.0, 0.0]).with_metadata("rank", 3i64),
                ],
            )
            .await
            .unwrap();

        // All three tie at score 1.0; the metadata key breaks the tie.
        let query = Query::new()
            .with_embedding(Embedding::new(vec![1.0, 0.0], "m"))
            .with_sort(SortCriterion::ascending(SortKey::Metadata("rank".into())));
        let result = collection.query(&ctx(), &query).await.unwrap();
        let ids: Vec<&str> = result
            .matches
            .iter()
            .map(|m| m.document.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let query = Query::new()
            .with_embedding(Embedding::new(vec![1.0, 0.0], "m"))
            .with_sort(SortCriterion::descending(SortKey::Metadata("rank".into())));
        let result = collection.query(&ctx(), &query).await.unwrap();
        let ids: Vec<&str> = result
            .matches
            .iter()
            .map(|m| m.document.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_score_filter_deferred_gate() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    embedded("near", "x", vec![1.0, 0.0]),
                    embedded("far", "y", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let query = Query::new()
            .with_embedding(Embedding::new(vec![1.0, 0.0], "m"))
            .with_filter(Filter::score(crate::filter::CompareOp::Gte, 0.5));
        let result = collection.query(&ctx(), &query).await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].document.id, "near");
    }

    #[tokio::test]
    async fn test_delete_purges_indexes() {
        let collection = Collection::new(
            "test",
            CollectionConfig::default().with_deduplication(),
        )
        .unwrap();
        collection
            .upsert(
                &ctx(),
                vec![embedded("a", "x", vec![1.0, 0.0]).with_tag("keep")],
            )
            .await
            .unwrap();

        let result = collection.delete(&ctx(), &["a", "ghost"]).await.unwrap();
        assert_eq!(result.deleted, 1);
        assert_eq!(result.not_found, 1);
        assert_eq!(result.not_found_ids, vec!["ghost".to_string()]);
        assert_eq!(collection.len(), 0);
        collection.assert_indexes_consistent();

        let hits = collection
            .query(&ctx(), &Query::new().with_filter(Filter::tag("keep")))
            .await
            .unwrap();
        assert!(hits.matches.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_filter() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    Document::text("a", "x").with_metadata("category", "A"),
                    Document::text("b", "y").with_metadata("category", "B"),
                    Document::text("c", "z").with_metadata("category", "A"),
                ],
            )
            .await
            .unwrap();

        let result = collection
            .delete_by_filter(&ctx(), &Filter::eq("category", "A"))
            .await
            .unwrap();
        assert_eq!(result.deleted, 2);
        assert_eq!(collection.len(), 1);
        assert!(collection.contains("b"));
    }

    #[tokio::test]
    async fn test_count_and_clear() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    Document::text("a", "x").with_tag("keep"),
                    Document::text("b", "y"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(collection.count(&ctx(), None).await.unwrap(), 2);
        assert_eq!(
            collection
                .count(&ctx(), Some(&Filter::tag("keep")))
                .await
                .unwrap(),
            1
        );

        collection.clear(&ctx()).await.unwrap();
        assert_eq!(collection.count(&ctx(), None).await.unwrap(), 0);
        collection.assert_indexes_consistent();
    }

    #[tokio::test]
    async fn test_ttl_and_sweep() {
        let collection = Collection::new(
            "test",
            CollectionConfig::default().with_ttl(Duration::from_millis(50)),
        )
        .unwrap();
        collection
            .upsert(&ctx(), vec![embedded("e", "hi", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(collection.count(&ctx(), None).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(80)).await;

        let removed = collection.sweep_expired(&ctx()).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(collection.count(&ctx(), None).await.unwrap(), 0);
        collection.assert_indexes_consistent();
    }

    #[tokio::test]
    async fn test_explicit_expiry_delete() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        let past = Utc::now() - chrono::Duration::seconds(5);
        collection
            .upsert(
                &ctx(),
                vec![
                    Document::text("old", "x")
                        .with_temporal(Temporal::new().with_expires_at(past)),
                    Document::text("live", "y"),
                ],
            )
            .await
            .unwrap();

        let result = collection
            .delete_by_filter(&ctx(), &Filter::expired())
            .await
            .unwrap();
        assert_eq!(result.deleted, 1);
        assert!(collection.contains("live"));
    }

    #[tokio::test]
    async fn test_returned_documents_are_copies() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(&ctx(), vec![embedded("a", "x", vec![1.0, 0.0])])
            .await
            .unwrap();

        let mut fetched = collection.get(&ctx(), &["a"]).await.unwrap();
        fetched[0].metadata.insert("mutated".into(), "yes".into());
        fetched[0].embedding.as_mut().unwrap().vector[0] = 99.0;

        let again = collection.get(&ctx(), &["a"]).await.unwrap();
        assert!(again[0].metadata.is_empty());
        assert_eq!(again[0].embedding.as_ref().unwrap().vector[0], 1.0);
    }

    #[tokio::test]
    async fn test_cancelled_context_rejected() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        let cancelled = Context::background();
        cancelled.cancel();

        assert!(matches!(
            collection.upsert(&cancelled, vec![Document::text("a", "x")]).await,
            Err(Error::Cancelled)
        ));
        assert!(matches!(
            collection.query(&cancelled, &Query::new()).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_query_stream_materialises() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        collection
            .upsert(
                &ctx(),
                vec![
                    embedded("a", "x", vec![1.0, 0.0]),
                    embedded("b", "y", vec![0.5, 0.5]),
                ],
            )
            .await
            .unwrap();

        let query = Query::new().with_embedding(Embedding::new(vec![1.0, 0.0], "m"));
        let mut stream = collection.query_stream(&ctx(), &query).await;
        let mut ids = Vec::new();
        while stream.next() {
            ids.push(stream.current().unwrap().document.id.clone());
        }
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert!(stream.error().is_none());
        stream.close();
    }

    #[tokio::test]
    async fn test_query_stream_carries_errors() {
        let collection = Collection::new("test", CollectionConfig::default()).unwrap();
        let query = Query::new().with_limit(0);
        let mut stream = collection.query_stream(&ctx(), &query).await;
        assert!(!stream.next());
        assert!(matches!(stream.error(), Some(Error::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let collection = Collection::new(
            "stats",
            CollectionConfig::default().with_versioning(),
        )
        .unwrap();
        collection
            .upsert(&ctx(), vec![embedded("a", "hello", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let stats = collection.stats(&ctx()).await.unwrap();
        assert_eq!(stats.name, "stats");
        assert_eq!(stats.documents, 1);
        assert!(stats.storage_bytes > 0);
        assert_eq!(stats.embedding_dimensions, Some(3));
        assert_eq!(stats.index_kind, IndexKind::Flat);
        assert!(stats.updated_at >= stats.created_at);
        assert_eq!(stats.extras["revision"], serde_json::Value::from(1u64));
    }
}
