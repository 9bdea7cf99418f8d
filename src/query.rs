//! Query types and results.

use crate::distance::DistanceMetric;
use crate::document::{Document, Embedding};
use crate::error::{Error, Result};
use crate::filter::{Filter, TemporalField};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of matches returned when no limit is set.
pub const DEFAULT_LIMIT: usize = 10;

/// Hard cap on the number of matches a single query may request.
pub const MAX_LIMIT: usize = 10_000;

/// A similarity query against a collection.
#[derive(Debug, Clone)]
pub struct Query {
    /// Vector to score candidates against. Without one, every candidate
    /// scores 1.0 and the query degrades to pure filtering.
    pub embedding: Option<Embedding>,
    /// Predicate tree applied before scoring. Absent means match all.
    pub filter: Option<Filter>,
    /// Maximum matches to return, in `1..=MAX_LIMIT`. Zero is rejected.
    pub limit: usize,
    /// Number of ranked matches to skip.
    pub offset: usize,
    /// Minimum similarity score in `[0, 1]`; zero disables the gate.
    ///
    /// Euclidean scores are `1/(1+distance)` and only approach 1
    /// asymptotically, so thresholds near 1 will drop everything but exact
    /// matches under that metric.
    pub min_score: f32,
    /// Distance metric used for scoring.
    pub metric: DistanceMetric,
    /// Return content payloads on matches.
    pub include_content: bool,
    /// Return metadata maps on matches.
    pub include_metadata: bool,
    /// Return embedding vectors on matches.
    pub include_embeddings: bool,
    /// Secondary sort keys applied after score, in list order.
    pub sort_by: Vec<SortCriterion>,
    /// Collect an execution breakdown alongside the results.
    pub explain: bool,
}

impl Query {
    /// A query with default limits and no embedding or filter.
    pub fn new() -> Self {
        Self {
            embedding: None,
            filter: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
            min_score: 0.0,
            metric: DistanceMetric::default(),
            include_content: true,
            include_metadata: true,
            include_embeddings: false,
            sort_by: Vec::new(),
            explain: false,
        }
    }

    /// Set the query embedding.
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the match limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the minimum score gate.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Add a secondary sort key.
    pub fn with_sort(mut self, criterion: SortCriterion) -> Self {
        self.sort_by.push(criterion);
        self
    }

    /// Return embedding vectors on matches.
    pub fn with_embeddings_included(mut self) -> Self {
        self.include_embeddings = true;
        self
    }

    /// Request an execution breakdown.
    pub fn with_explain(mut self) -> Self {
        self.explain = true;
        self
    }

    /// Validate limits, score range, and the embedding.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::InvalidQuery("limit must be at least 1".to_string()));
        }
        if self.limit > MAX_LIMIT {
            return Err(Error::InvalidQuery(format!(
                "limit {} exceeds maximum {MAX_LIMIT}",
                self.limit
            )));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::InvalidQuery(format!(
                "min_score {} outside [0, 1]",
                self.min_score
            )));
        }
        if let Some(embedding) = &self.embedding {
            embedding
                .validate()
                .map_err(|reason| Error::InvalidQuery(format!("embedding: {reason}")))?;
        }
        Ok(())
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

/// A secondary sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortCriterion {
    /// What to sort on.
    pub key: SortKey,
    /// Direction; ascending unless declared otherwise.
    pub direction: SortDirection,
}

impl SortCriterion {
    /// Ascending sort on the given key.
    pub fn ascending(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Ascending,
        }
    }

    /// Descending sort on the given key.
    pub fn descending(key: SortKey) -> Self {
        Self {
            key,
            direction: SortDirection::Descending,
        }
    }
}

/// Sortable attributes of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// The similarity score itself.
    Score,
    /// A named metadata field, compared numerically when both sides are
    /// numeric and lexicographically otherwise.
    Metadata(String),
    /// One of the document's timestamps.
    Temporal(TemporalField),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// A document returned by a query, with its score and rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    /// The matching document, shaped by the query's include flags.
    pub document: Document,
    /// Similarity score; 1.0 for filter-only queries.
    pub score: f32,
    /// Raw distance under the query metric; 0.0 for filter-only queries.
    pub distance: f32,
    /// 1-based rank, offset-adjusted: the first returned match of a query
    /// with offset 20 has rank 21.
    pub rank: usize,
}

/// The outcome of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Ranked matches, best first.
    pub matches: Vec<Match>,
    /// Total matches before offset and limit were applied.
    pub total: usize,
    /// The offset that was applied.
    pub offset: usize,
    /// The limit that was applied.
    pub limit: usize,
    /// Phase-by-phase timing.
    pub timing: QueryTiming,
    /// Execution breakdown, present when the query asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain: Option<QueryExplain>,
}

/// Where query time was spent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueryTiming {
    /// Wall-clock total.
    pub total: Duration,
    /// Filter evaluation over the candidate set.
    pub filter_application: Duration,
    /// Scoring, sorting, and the min-score gate.
    pub scoring: Duration,
    /// Materialising the returned matches.
    pub retrieval: Duration,
    /// Vector comparisons alone.
    pub vector_search: Duration,
}

/// Execution breakdown returned when [`Query::explain`] is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExplain {
    /// The strategy the engine chose. Always `brute_force` for the
    /// in-memory implementation.
    pub strategy: String,
    /// How many documents the engine looked at.
    pub scanned_documents: usize,
    /// How many documents survived filter application.
    pub filtered_documents: usize,
    /// How many vector comparisons were computed.
    pub vector_comparisons: usize,
    /// Named per-step durations, in execution order.
    pub steps: Vec<ExplainStep>,
}

/// One named step in an execution breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainStep {
    /// Step name.
    pub name: String,
    /// Time spent in the step.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let q = Query::new();
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert_eq!(q.offset, 0);
        assert_eq!(q.min_score, 0.0);
        assert_eq!(q.metric, DistanceMetric::Cosine);
        assert!(q.include_content);
        assert!(!q.include_embeddings);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_limit_bounds() {
        assert!(Query::new().with_limit(0).validate().is_err());
        assert!(Query::new().with_limit(1).validate().is_ok());
        assert!(Query::new().with_limit(MAX_LIMIT).validate().is_ok());
        assert!(Query::new().with_limit(MAX_LIMIT + 1).validate().is_err());
    }

    #[test]
    fn test_min_score_bounds() {
        assert!(Query::new().with_min_score(0.5).validate().is_ok());
        assert!(Query::new().with_min_score(1.0).validate().is_ok());
        assert!(Query::new().with_min_score(-0.1).validate().is_err());
        assert!(Query::new().with_min_score(1.1).validate().is_err());
    }

    #[test]
    fn test_embedding_must_be_finite() {
        let q = Query::new().with_embedding(Embedding::new(vec![f32::NAN, 0.0], "m"));
        assert!(q.validate().is_err());
        let q = Query::new().with_embedding(Embedding::new(vec![1.0, 0.0], "m"));
        assert!(q.validate().is_ok());
    }
}
