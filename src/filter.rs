//! Composable filter algebra over documents.
//!
//! [`Filter`] is a closed predicate tree: composites (`and`/`or`/`not`),
//! metadata field comparisons, tag membership, scope matching, temporal
//! comparisons, and score thresholds. The engine evaluates the tree per
//! candidate; score predicates are deferred until a similarity score exists
//! and are treated as satisfied before that.
//!
//! Decomposition accessors (`as_and`, `as_field`, …) let alternative
//! backends translate a tree into provider-native queries without the core
//! exposing its internals for extension.

use crate::document::{Document, Scope, ScopeField};
use crate::metadata::MetadataValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comparison operators for temporal and score predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl CompareOp {
    fn eval<T: PartialOrd>(&self, left: T, right: T) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Gt => left > right,
            CompareOp::Gte => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Lte => left <= right,
        }
    }
}

/// Operators applicable to metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOp {
    /// Equal (numeric coercion applies).
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Member of the given sequence.
    In,
    /// Not a member of the given sequence.
    Nin,
    /// String contains substring, or sequence contains element.
    Contains,
    /// String starts with prefix.
    StartsWith,
    /// String ends with suffix.
    EndsWith,
    /// Field is present.
    Exists,
    /// Field is absent.
    NotExists,
}

/// Temporal fields addressable by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalField {
    /// Storage creation time.
    CreatedAt,
    /// Last write time.
    UpdatedAt,
    /// Expiry instant.
    ExpiresAt,
    /// Domain event time.
    EventTime,
    /// Validity window start.
    ValidFrom,
    /// Validity window end.
    ValidUntil,
}

impl TemporalField {
    /// The canonical field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalField::CreatedAt => "created_at",
            TemporalField::UpdatedAt => "updated_at",
            TemporalField::ExpiresAt => "expires_at",
            TemporalField::EventTime => "event_time",
            TemporalField::ValidFrom => "valid_from",
            TemporalField::ValidUntil => "valid_until",
        }
    }
}

/// A member of the closed predicate algebra.
///
/// An absent filter (engine-side `Option<Filter>` of `None`) matches every
/// document; `Filter::And(vec![])` behaves the same way, while
/// `Filter::Or(vec![])` matches nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    /// All children must match. Short-circuits.
    And(Vec<Filter>),
    /// At least one child must match. Short-circuits.
    Or(Vec<Filter>),
    /// The child must not match.
    Not(Box<Filter>),
    /// A comparison against a metadata field.
    Field {
        /// Metadata key.
        name: String,
        /// Operator.
        op: FieldOp,
        /// Right-hand operand; a sequence for `In`/`Nin`.
        value: MetadataValue,
    },
    /// The document's tag set contains the given tag.
    Tag(String),
    /// Every non-empty field of the given scope matches the document's.
    Scope(Scope),
    /// A comparison against one of the document's timestamps. Missing
    /// optional timestamps evaluate false for any comparison.
    Temporal {
        /// Which timestamp to compare.
        field: TemporalField,
        /// Operator.
        op: CompareOp,
        /// Right-hand instant.
        at: DateTime<Utc>,
    },
    /// A threshold on the query-time similarity score. Deferred to the
    /// scoring stage.
    Score {
        /// Operator.
        op: CompareOp,
        /// Threshold the score is compared against.
        threshold: f32,
    },
}

impl Filter {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Conjunction of filters.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Disjunction of filters.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Negation of a filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Arbitrary field comparison.
    pub fn field(name: impl Into<String>, op: FieldOp, value: impl Into<MetadataValue>) -> Self {
        Filter::Field {
            name: name.into(),
            op,
            value: value.into(),
        }
    }

    /// Field equals value.
    pub fn eq(name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(name, FieldOp::Eq, value)
    }

    /// Field differs from value.
    pub fn ne(name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(name, FieldOp::Ne, value)
    }

    /// Field greater than value.
    pub fn gt(name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(name, FieldOp::Gt, value)
    }

    /// Field greater than or equal to value.
    pub fn gte(name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(name, FieldOp::Gte, value)
    }

    /// Field less than value.
    pub fn lt(name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(name, FieldOp::Lt, value)
    }

    /// Field less than or equal to value.
    pub fn lte(name: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(name, FieldOp::Lte, value)
    }

    /// Field exists.
    pub fn exists(name: impl Into<String>) -> Self {
        Self::field(name, FieldOp::Exists, MetadataValue::Null)
    }

    /// Field does not exist.
    pub fn not_exists(name: impl Into<String>) -> Self {
        Self::field(name, FieldOp::NotExists, MetadataValue::Null)
    }

    /// Tag membership.
    pub fn tag(tag: impl Into<String>) -> Self {
        Filter::Tag(tag.into())
    }

    /// Scope match.
    pub fn scope(scope: Scope) -> Self {
        Filter::Scope(scope)
    }

    /// Temporal comparison.
    pub fn temporal(field: TemporalField, op: CompareOp, at: DateTime<Utc>) -> Self {
        Filter::Temporal { field, op, at }
    }

    /// Score threshold, deferred to the scoring stage.
    pub fn score(op: CompareOp, threshold: f32) -> Self {
        Filter::Score { op, threshold }
    }

    /// Documents whose expiry instant is already past.
    pub fn expired() -> Self {
        Filter::Temporal {
            field: TemporalField::ExpiresAt,
            op: CompareOp::Lte,
            at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate against a document before scoring.
    ///
    /// Score predicates are treated as satisfied; re-evaluate with
    /// [`Filter::matches_scored`] once a score is available.
    pub fn matches(&self, doc: &Document) -> bool {
        self.eval(doc, None)
    }

    /// Evaluate against a document with its similarity score bound.
    pub fn matches_scored(&self, doc: &Document, score: f32) -> bool {
        self.eval(doc, Some(score))
    }

    /// True when the tree contains at least one score predicate.
    pub fn has_score_predicates(&self) -> bool {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                children.iter().any(Filter::has_score_predicates)
            }
            Filter::Not(child) => child.has_score_predicates(),
            Filter::Score { .. } => true,
            _ => false,
        }
    }

    fn eval(&self, doc: &Document, score: Option<f32>) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.eval(doc, score)),
            Filter::Or(children) => children.iter().any(|f| f.eval(doc, score)),
            Filter::Not(child) => !child.eval(doc, score),
            Filter::Field { name, op, value } => eval_field(doc, name, *op, value),
            Filter::Tag(tag) => doc.tags.iter().any(|t| t == tag),
            Filter::Scope(scope) => eval_scope(doc, scope),
            Filter::Temporal { field, op, at } => match temporal_value(doc, *field) {
                Some(ts) => op.eval(ts, *at),
                None => false,
            },
            Filter::Score { op, threshold } => match score {
                Some(s) => op.eval(s, *threshold),
                // Deferred: satisfied until the scoring stage binds a score.
                None => true,
            },
        }
    }

    // ------------------------------------------------------------------
    // Decomposition
    // ------------------------------------------------------------------

    /// The children, if this is a conjunction.
    pub fn as_and(&self) -> Option<&[Filter]> {
        match self {
            Filter::And(children) => Some(children),
            _ => None,
        }
    }

    /// The children, if this is a disjunction.
    pub fn as_or(&self) -> Option<&[Filter]> {
        match self {
            Filter::Or(children) => Some(children),
            _ => None,
        }
    }

    /// The children of either composite variant.
    pub fn children(&self) -> Option<&[Filter]> {
        match self {
            Filter::And(children) | Filter::Or(children) => Some(children),
            _ => None,
        }
    }

    /// The negated child, if this is a negation.
    pub fn as_not(&self) -> Option<&Filter> {
        match self {
            Filter::Not(child) => Some(child),
            _ => None,
        }
    }

    /// The parts of a field comparison.
    pub fn as_field(&self) -> Option<(&str, FieldOp, &MetadataValue)> {
        match self {
            Filter::Field { name, op, value } => Some((name, *op, value)),
            _ => None,
        }
    }

    /// The tag, if this is a tag filter.
    pub fn as_tag(&self) -> Option<&str> {
        match self {
            Filter::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    /// The scope, if this is a scope filter.
    pub fn as_scope(&self) -> Option<&Scope> {
        match self {
            Filter::Scope(scope) => Some(scope),
            _ => None,
        }
    }

    /// The parts of a temporal comparison.
    pub fn as_temporal(&self) -> Option<(TemporalField, CompareOp, DateTime<Utc>)> {
        match self {
            Filter::Temporal { field, op, at } => Some((*field, *op, *at)),
            _ => None,
        }
    }

    /// The parts of a score threshold.
    pub fn as_score(&self) -> Option<(CompareOp, f32)> {
        match self {
            Filter::Score { op, threshold } => Some((*op, *threshold)),
            _ => None,
        }
    }
}

/// Evaluate an optional filter: `None` matches everything.
pub fn matches_optional(filter: Option<&Filter>, doc: &Document) -> bool {
    filter.map_or(true, |f| f.matches(doc))
}

fn eval_field(doc: &Document, name: &str, op: FieldOp, rhs: &MetadataValue) -> bool {
    let lhs = doc.metadata.get(name);
    match op {
        FieldOp::Exists => return lhs.is_some(),
        FieldOp::NotExists => return lhs.is_none(),
        _ => {}
    }
    let Some(lhs) = lhs else {
        return false;
    };
    match op {
        FieldOp::Eq => lhs.loosely_equals(rhs),
        FieldOp::Ne => !lhs.loosely_equals(rhs),
        FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
            let cmp_op = match op {
                FieldOp::Gt => CompareOp::Gt,
                FieldOp::Gte => CompareOp::Gte,
                FieldOp::Lt => CompareOp::Lt,
                _ => CompareOp::Lte,
            };
            if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
                cmp_op.eval(a, b)
            } else if let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) {
                cmp_op.eval(a, b)
            } else {
                false
            }
        }
        FieldOp::In => rhs
            .as_sequence()
            .is_some_and(|seq| seq.iter().any(|v| lhs.loosely_equals(v))),
        FieldOp::Nin => rhs
            .as_sequence()
            .is_some_and(|seq| !seq.iter().any(|v| lhs.loosely_equals(v))),
        FieldOp::Contains => match lhs {
            MetadataValue::String(s) => rhs.as_str().is_some_and(|needle| s.contains(needle)),
            MetadataValue::Sequence(seq) => seq.iter().any(|v| v.loosely_equals(rhs)),
            _ => false,
        },
        FieldOp::StartsWith => match (lhs.as_str(), rhs.as_str()) {
            (Some(s), Some(prefix)) => s.starts_with(prefix),
            _ => false,
        },
        FieldOp::EndsWith => match (lhs.as_str(), rhs.as_str()) {
            (Some(s), Some(suffix)) => s.ends_with(suffix),
            _ => false,
        },
        FieldOp::Exists | FieldOp::NotExists => unreachable!("handled above"),
    }
}

fn eval_scope(doc: &Document, wanted: &Scope) -> bool {
    let doc_scope = doc.scope.as_ref();
    for field in ScopeField::ALL {
        if let Some(expected) = wanted.field(field) {
            match doc_scope.and_then(|s| s.field(field)) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
    }
    for (key, expected) in &wanted.custom {
        if expected.is_empty() {
            continue;
        }
        match doc_scope.and_then(|s| s.custom.get(key)) {
            Some(actual) if actual == expected => {}
            _ => return false,
        }
    }
    true
}

fn temporal_value(doc: &Document, field: TemporalField) -> Option<DateTime<Utc>> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Temporal};

    fn doc() -> Document {
        Document::text("d1", "hello")
            .with_tag("keep")
            .with_metadata("category", "A")
            .with_metadata("score", 30i64)
            .with_metadata("title", "alpha release")
    }

    #[test]
    fn test_nil_filter_matches() {
        assert!(matches_optional(None, &doc()));
    }

    #[test]
    fn test_field_eq_and_coercion() {
        assert!(Filter::eq("category", "A").matches(&doc()));
        assert!(!Filter::eq("category", "B").matches(&doc()));
        // Int metadata compared against a float operand.
        assert!(Filter::eq("score", 30.0).matches(&doc()));
    }

    #[test]
    fn test_field_ordering() {
        assert!(Filter::gt("score", 15i64).matches(&doc()));
        assert!(!Filter::gt("score", 30i64).matches(&doc()));
        assert!(Filter::gte("score", 30i64).matches(&doc()));
        assert!(Filter::lt("score", 100i64).matches(&doc()));
        // Lexicographic string ordering.
        assert!(Filter::gt("category", "0").matches(&doc()));
    }

    #[test]
    fn test_missing_field_comparisons() {
        assert!(!Filter::eq("absent", "x").matches(&doc()));
        assert!(!Filter::gt("absent", 1i64).matches(&doc()));
        assert!(Filter::not_exists("absent").matches(&doc()));
        assert!(Filter::exists("category").matches(&doc()));
    }

    #[test]
    fn test_in_and_contains() {
        let in_filter = Filter::field("category", FieldOp::In, vec!["A", "B"]);
        assert!(in_filter.matches(&doc()));
        let nin_filter = Filter::field("category", FieldOp::Nin, vec!["B", "C"]);
        assert!(nin_filter.matches(&doc()));
        assert!(Filter::field("title", FieldOp::Contains, "release").matches(&doc()));
        assert!(Filter::field("title", FieldOp::StartsWith, "alpha").matches(&doc()));
        assert!(Filter::field("title", FieldOp::EndsWith, "release").matches(&doc()));
    }

    #[test]
    fn test_composites_short_circuit() {
        let f = Filter::and([Filter::eq("category", "A"), Filter::gt("score", 15i64)]);
        assert!(f.matches(&doc()));
        let f = Filter::and([Filter::eq("category", "B"), Filter::gt("score", 15i64)]);
        assert!(!f.matches(&doc()));
        let f = Filter::or([Filter::eq("category", "B"), Filter::tag("keep")]);
        assert!(f.matches(&doc()));
    }

    #[test]
    fn test_identity_laws() {
        let f = Filter::eq("category", "A");
        let d = doc();
        // and(f, identity) == f
        assert_eq!(
            Filter::and([f.clone(), Filter::And(vec![])]).matches(&d),
            f.matches(&d)
        );
        // or(f, never) == f
        assert_eq!(
            Filter::or([f.clone(), Filter::Or(vec![])]).matches(&d),
            f.matches(&d)
        );
        // not(not(f)) == f
        assert_eq!(
            Filter::not(Filter::not(f.clone())).matches(&d),
            f.matches(&d)
        );
    }

    #[test]
    fn test_scope_filter() {
        let mut d = doc();
        d.scope = Some(Scope::new().with_tenant("acme").with_user("u1"));

        assert!(Filter::scope(Scope::new()).matches(&d));
        assert!(Filter::scope(Scope::new().with_tenant("acme")).matches(&d));
        assert!(!Filter::scope(Scope::new().with_tenant("other")).matches(&d));
        assert!(!Filter::scope(Scope::new().with_session("s")).matches(&d));

        // Document without scope only matches an empty filter scope.
        let bare = doc();
        assert!(Filter::scope(Scope::new()).matches(&bare));
        assert!(!Filter::scope(Scope::new().with_tenant("acme")).matches(&bare));
    }

    #[test]
    fn test_temporal_filter() {
        let now = Utc::now();
        let mut d = doc();
        d.temporal = Some(Temporal {
            created_at: Some(now),
            updated_at: Some(now),
            ..Temporal::default()
        });

        assert!(Filter::temporal(
            TemporalField::CreatedAt,
            CompareOp::Lte,
            now + chrono::Duration::seconds(1)
        )
        .matches(&d));
        // Missing optional field compares false.
        assert!(!Filter::temporal(TemporalField::ExpiresAt, CompareOp::Lte, now).matches(&d));
        assert!(!Filter::expired().matches(&d));
    }

    #[test]
    fn test_score_deferred_then_bound() {
        let f = Filter::and([
            Filter::eq("category", "A"),
            Filter::score(CompareOp::Gte, 0.5),
        ]);
        let d = doc();
        // Pre-scoring: score predicates are satisfied.
        assert!(f.matches(&d));
        assert!(f.has_score_predicates());
        // Post-scoring: the bound score decides.
        assert!(f.matches_scored(&d, 0.9));
        assert!(!f.matches_scored(&d, 0.1));
        // Negated score predicates still compose correctly once bound.
        let negated = Filter::not(Filter::score(CompareOp::Gte, 0.5));
        assert!(!negated.matches_scored(&d, 0.9));
        assert!(negated.matches_scored(&d, 0.1));
    }

    #[test]
    fn test_decomposition_helpers() {
        let f = Filter::and([Filter::tag("keep"), Filter::eq("category", "A")]);
        let children = f.as_and().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].as_tag(), Some("keep"));
        let (name, op, value) = children[1].as_field().unwrap();
        assert_eq!(name, "category");
        assert_eq!(op, FieldOp::Eq);
        assert_eq!(value.as_str(), Some("A"));

        assert!(f.as_or().is_none());
        assert!(f.children().is_some());
        assert!(Filter::not(Filter::tag("x")).as_not().is_some());
        assert!(Filter::score(CompareOp::Gt, 0.1).as_score().is_some());
        assert!(Filter::expired().as_temporal().is_some());
    }
}
