//! Secondary indexes maintained beside a collection's primary store.
//!
//! Every mutation updates the primary map and these indexes together under
//! the collection's write lock, so membership always agrees: an id present
//! in the primary appears under each of its scope values, tags, temporal
//! buckets, and (when deduplication is on) its content hash, and no index
//! holds an id the primary lacks.

use crate::document::{Document, ScopeField};
use crate::filter::{Filter, TemporalField};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Temporal fields that carry an index. Coarse minute-granularity buckets.
const INDEXED_TEMPORAL: [TemporalField; 3] = [
    TemporalField::CreatedAt,
    TemporalField::UpdatedAt,
    TemporalField::ExpiresAt,
];

fn minute_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

/// SHA-256 over a document's textual content concatenated with its
/// embedding vector. The basis of the deduplication index.
pub(crate) fn content_hash(doc: &Document) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.content.textual().as_bytes());
    if let Some(embedding) = &doc.embedding {
        for component in &embedding.vector {
            hasher.update(component.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// The per-collection secondary index set.
#[derive(Debug, Default)]
pub(crate) struct SecondaryIndexes {
    scope: HashMap<ScopeField, HashMap<String, HashSet<String>>>,
    temporal: HashMap<TemporalField, BTreeMap<i64, HashSet<String>>>,
    tags: HashMap<String, HashSet<String>>,
    content_hashes: HashMap<String, String>,
}

impl SecondaryIndexes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a document. `hash` is present only when deduplication is on.
    pub(crate) fn insert(&mut self, doc: &Document, hash: Option<String>) {
        if let Some(scope) = &doc.scope {
            for field in ScopeField::ALL {
                if let Some(value) = scope.field(field) {
                    self.scope
                        .entry(field)
                        .or_default()
                        .entry(value.to_string())
                        .or_default()
                        .insert(doc.id.clone());
                }
            }
        }
        for field in INDEXED_TEMPORAL {
            if let Some(at) = temporal_field(doc, field) {
                self.temporal
                    .entry(field)
                    .or_default()
                    .entry(minute_bucket(at))
                    .or_default()
                    .insert(doc.id.clone());
            }
        }
        for tag in &doc.tags {
            self.tags.entry(tag.clone()).or_default().insert(doc.id.clone());
        }
        if let Some(hash) = hash {
            self.content_hashes.insert(hash, doc.id.clone());
        }
    }

    /// Drop every entry belonging to a stored document.
    pub(crate) fn remove(&mut self, doc: &Document, dedup_enabled: bool) {
        if let Some(scope) = &doc.scope {
            for field in ScopeField::ALL {
                if let Some(value) = scope.field(field) {
                    if let Some(by_value) = self.scope.get_mut(&field) {
                        if let Some(ids) = by_value.get_mut(value) {
                            ids.remove(&doc.id);
                            if ids.is_empty() {
                                by_value.remove(value);
                            }
                        }
                    }
                }
            }
        }
        for field in INDEXED_TEMPORAL {
            if let Some(at) = temporal_field(doc, field) {
                if let Some(buckets) = self.temporal.get_mut(&field) {
                    let bucket = minute_bucket(at);
                    if let Some(ids) = buckets.get_mut(&bucket) {
                        ids.remove(&doc.id);
                        if ids.is_empty() {
                            buckets.remove(&bucket);
                        }
                    }
                }
            }
        }
        for tag in &doc.tags {
            if let Some(ids) = self.tags.get_mut(tag) {
                ids.remove(&doc.id);
                if ids.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        if dedup_enabled {
            let hash = content_hash(doc);
            if self.content_hashes.get(&hash).is_some_and(|id| *id == doc.id) {
                self.content_hashes.remove(&hash);
            }
        }
    }

    /// Reset every index.
    pub(crate) fn clear(&mut self) {
        self.scope.clear();
        self.temporal.clear();
        self.tags.clear();
        self.content_hashes.clear();
    }

    /// The id a content hash currently maps to.
    pub(crate) fn id_for_hash(&self, hash: &str) -> Option<&str> {
        self.content_hashes.get(hash).map(String::as_str)
    }

    /// Ids whose `expires_at` bucket is at or before `now`. Bucketing is
    /// coarse; callers re-check the exact timestamp.
    pub(crate) fn expiry_candidates(&self, now: DateTime<Utc>) -> Vec<String> {
        let Some(buckets) = self.temporal.get(&TemporalField::ExpiresAt) else {
            return Vec::new();
        };
        buckets
            .range(..=minute_bucket(now))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Candidate ids for a filter when an index can answer it directly.
    ///
    /// Only single tag filters take this fast path today; everything else
    /// falls back to a full scan.
    pub(crate) fn candidates(&self, filter: &Filter) -> Option<Vec<String>> {
        let tag = filter.as_tag()?;
        Some(
            self.tags
                .get(tag)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    #[cfg(test)]
    pub(crate) fn tag_ids(&self, tag: &str) -> Vec<String> {
        self.tags
            .get(tag)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn scope_ids(&self, field: ScopeField, value: &str) -> Vec<String> {
        self.scope
            .get(&field)
            .and_then(|by_value| by_value.get(value))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Verify membership agreement against a primary store. Test support.
    #[cfg(test)]
    pub(crate) fn is_consistent_with(
        &self,
        primary: &HashMap<String, Document>,
        dedup_enabled: bool,
    ) -> bool {
        // Every indexed id must exist in the primary.
        let all_indexed = self
            .scope
            .values()
            .flat_map(|by_value| by_value.values())
            .chain(self.tags.values())
            .chain(self.temporal.values().flat_map(|b| b.values()))
            .flatten();
        for id in all_indexed {
            if !primary.contains_key(id) {
                return false;
            }
        }
        if self.content_hashes.values().any(|id| !primary.contains_key(id)) {
            return false;
        }

        // Every primary document must be findable under each of its keys.
        for doc in primary.values() {
            for tag in &doc.tags {
                if !self.tags.get(tag).is_some_and(|ids| ids.contains(&doc.id)) {
                    return false;
                }
            }
            if let Some(scope) = &doc.scope {
                for field in ScopeField::ALL {
                    if let Some(value) = scope.field(field) {
                        if !self
                            .scope
                            .get(&field)
                            .and_then(|by_value| by_value.get(value))
                            .is_some_and(|ids| ids.contains(&doc.id))
                        {
                            return false;
                        }
                    }
                }
            }
            for field in INDEXED_TEMPORAL {
                if let Some(at) = temporal_field(doc, field) {
                    if !self
                        .temporal
                        .get(&field)
                        .and_then(|buckets| buckets.get(&minute_bucket(at)))
                        .is_some_and(|ids| ids.contains(&doc.id))
                    {
                        return false;
                    }
                }
            }
            if dedup_enabled {
                let hash = content_hash(doc);
                // The hash may point at a newer document with equal content;
                // it must at least resolve to some live id.
                if !self
                    .content_hashes
                    .get(&hash)
                    .is_some_and(|id| primary.contains_key(id))
                {
                    return false;
                }
            }
        }
        true
    }
}

fn temporal_field(doc: &Document, field: TemporalField) -> Option<DateTime<Utc>> {
    let temporal = doc.temporal.as_ref()?;
    match field {
        TemporalField::CreatedAt => temporal.created_at,
        TemporalField::UpdatedAt => temporal.updated_at,
        TemporalField::ExpiresAt => temporal.expires_at,
        TemporalField::EventTime => temporal.event_time,
        TemporalField::ValidFrom => temporal.valid_from,
        TemporalField::ValidUntil => temporal.valid_until,
    }
}
