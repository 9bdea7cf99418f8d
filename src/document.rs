//! Document data model and validation.
//!
//! A [`Document`] is the unit of storage: an identifier, a required
//! [`Content`] payload, and optional embedding, scope, temporal, tag, and
//! metadata attachments. Validation rules live next to the types they
//! protect; the collection engine runs them before any state is touched.

use crate::error::{Error, Result};
use crate::metadata::{validate_metadata_key, MetadataValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum length of a document id, in characters.
pub const MAX_ID_LENGTH: usize = 512;

/// Maximum length of a scope field value, in characters.
pub const MAX_SCOPE_VALUE_LENGTH: usize = 256;

/// Maximum length of a tag, in characters.
pub const MAX_TAG_LENGTH: usize = 128;

// ============================================================================
// Document
// ============================================================================

/// A stored record: content plus its retrieval attachments.
///
/// `score` and `distance` are transient query-time fields; the engine never
/// persists them and only populates them on returned matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within the owning collection.
    pub id: String,
    /// The payload being stored.
    pub content: Content,
    /// Optional embedding vector used for similarity scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    /// Optional multi-tenant isolation scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    /// Timestamps, including optional expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<Temporal>,
    /// Free-form tags for exact-match filtering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Key-value metadata queried by the filter algebra.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, MetadataValue>,
    /// Query-time similarity score. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Query-time raw distance. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl Document {
    /// Create a document with the given id and content.
    pub fn new(id: impl Into<String>, content: Content) -> Self {
        Self {
            id: id.into(),
            content,
            embedding: None,
            scope: None,
            temporal: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            score: None,
            distance: None,
        }
    }

    /// Create a plain-text document.
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, Content::text(text))
    }

    /// Attach an embedding.
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Attach a scope.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Attach temporal information.
    pub fn with_temporal(mut self, temporal: Temporal) -> Self {
        self.temporal = Some(temporal);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate every field of this document.
    ///
    /// `index` is the document's position in the caller's input and is
    /// carried into the error for batch diagnostics.
    pub fn validate(&self, index: usize) -> Result<()> {
        validate_id(&self.id, index)?;
        self.content
            .validate()
            .map_err(|reason| Error::invalid_document(index, "content", reason))?;
        if let Some(embedding) = &self.embedding {
            embedding
                .validate()
                .map_err(|reason| Error::invalid_document(index, "embedding", reason))?;
        }
        if let Some(scope) = &self.scope {
            scope
                .validate()
                .map_err(|reason| Error::invalid_document(index, "scope", reason))?;
        }
        if let Some(temporal) = &self.temporal {
            temporal
                .validate()
                .map_err(|reason| Error::invalid_document(index, "temporal", reason))?;
        }
        for tag in &self.tags {
            validate_tag(tag).map_err(|reason| Error::invalid_document(index, "tags", reason))?;
        }
        for key in self.metadata.keys() {
            validate_metadata_key(key)
                .map_err(|reason| Error::invalid_document(index, "metadata", reason))?;
        }
        Ok(())
    }

    /// Rough in-memory footprint: id, content, vector, tags, and metadata.
    pub fn approximate_size(&self) -> usize {
        let mut size = self.id.len();
        size += self.content.approximate_size();
        if let Some(embedding) = &self.embedding {
            size += embedding.vector.len() * std::mem::size_of::<f32>();
            size += embedding.model.len();
        }
        size += self.tags.iter().map(String::len).sum::<usize>();
        size += self
            .metadata
            .iter()
            .map(|(k, v)| k.len() + v.approximate_size())
            .sum::<usize>();
        size
    }
}

fn validate_id(id: &str, index: usize) -> Result<()> {
    if id.is_empty() {
        return Err(Error::invalid_document(index, "id", "must not be empty"));
    }
    let len = id.chars().count();
    if len > MAX_ID_LENGTH {
        return Err(Error::invalid_document(
            index,
            "id",
            format!("length {len} exceeds {MAX_ID_LENGTH} characters"),
        ));
    }
    if id == "." || id == ".." {
        return Err(Error::invalid_document(
            index,
            "id",
            "must not be '.' or '..'",
        ));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(Error::invalid_document(
            index,
            "id",
            "contains control characters",
        ));
    }
    if id.contains('/') || id.contains('\\') || id.contains('\0') {
        return Err(Error::invalid_document(
            index,
            "id",
            "must not contain '/', '\\', or NUL",
        ));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    if tag.is_empty() {
        return Err("tag must not be empty".to_string());
    }
    let len = tag.chars().count();
    if len > MAX_TAG_LENGTH {
        return Err(format!("tag length {len} exceeds {MAX_TAG_LENGTH} characters"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':'))
    {
        return Err(format!("tag '{tag}' contains characters outside [A-Za-z0-9_-:]"));
    }
    Ok(())
}

// ============================================================================
// Content
// ============================================================================

/// The payload of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Textual content: a whole body, pre-split chunks, or both.
    Text {
        /// Full text body.
        #[serde(default)]
        text: String,
        /// Pre-chunked fragments, when the caller has already split.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        chunks: Vec<String>,
    },
    /// A still image.
    Image(Media),
    /// An audio clip.
    Audio(Media),
    /// A video clip.
    Video(Media),
    /// Mixed text and media parts.
    Multimodal {
        /// Accompanying text, possibly empty when media carries the payload.
        #[serde(default)]
        text: String,
        /// Attached media parts.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        media: Vec<Media>,
    },
}

impl Content {
    /// Textual content from a single body.
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text {
            text: text.into(),
            chunks: Vec::new(),
        }
    }

    /// Textual content from pre-split chunks.
    pub fn chunks(chunks: Vec<String>) -> Self {
        Content::Text {
            text: String::new(),
            chunks,
        }
    }

    /// Short name of the variant, used in stats and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Text { .. } => "text",
            Content::Image(_) => "image",
            Content::Audio(_) => "audio",
            Content::Video(_) => "video",
            Content::Multimodal { .. } => "multimodal",
        }
    }

    /// The textual portion of the content, joined for hashing and
    /// auto-embedding. Media-only variants yield an empty string.
    pub fn textual(&self) -> String {
        match self {
            Content::Text { text, chunks } => {
                if chunks.is_empty() {
                    text.clone()
                } else if text.is_empty() {
                    chunks.join("\n")
                } else {
                    let mut joined = text.clone();
                    for chunk in chunks {
                        joined.push('\n');
                        joined.push_str(chunk);
                    }
                    joined
                }
            }
            Content::Multimodal { text, .. } => text.clone(),
            _ => String::new(),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Content::Text { text, chunks } => {
                if text.is_empty() && chunks.iter().all(String::is_empty) {
                    return Err("text content requires text or chunks".to_string());
                }
                Ok(())
            }
            Content::Image(media) | Content::Audio(media) | Content::Video(media) => {
                media.validate()
            }
            Content::Multimodal { text, media } => {
                if text.is_empty() && media.is_empty() {
                    return Err("multimodal content requires text or media".to_string());
                }
                for part in media {
                    part.validate()?;
                }
                Ok(())
            }
        }
    }

    fn approximate_size(&self) -> usize {
        match self {
            Content::Text { text, chunks } => {
                text.len() + chunks.iter().map(String::len).sum::<usize>()
            }
            Content::Image(media) | Content::Audio(media) | Content::Video(media) => {
                media.approximate_size()
            }
            Content::Multimodal { text, media } => {
                text.len() + media.iter().map(Media::approximate_size).sum::<usize>()
            }
        }
    }
}

/// A binary media payload, inline or by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    /// Inline bytes, when the payload is embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    /// Location of the payload, when stored elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// MIME type of the payload. Required.
    pub mime: String,
}

impl Media {
    /// Media referenced by URL.
    pub fn url(url: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            bytes: None,
            url: Some(url.into()),
            mime: mime.into(),
        }
    }

    /// Media carried inline.
    pub fn bytes(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes: Some(bytes),
            url: None,
            mime: mime.into(),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let has_bytes = self.bytes.as_ref().is_some_and(|b| !b.is_empty());
        let has_url = self.url.as_ref().is_some_and(|u| !u.is_empty());
        if !has_bytes && !has_url {
            return Err("media requires inline bytes or a URL reference".to_string());
        }
        if self.mime.is_empty() {
            return Err("media requires a MIME type".to_string());
        }
        Ok(())
    }

    fn approximate_size(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
            + self.url.as_ref().map_or(0, String::len)
            + self.mime.len()
    }
}

// ============================================================================
// Embedding
// ============================================================================

/// A finite-dimensional real-valued vector with its model identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// The vector components.
    pub vector: Vec<f32>,
    /// Identifier of the model that produced the vector.
    pub model: String,
    /// Declared dimensionality. Must equal `vector.len()`.
    pub dimensions: u32,
    /// Whether the vector has unit L2 norm.
    pub normalized: bool,
}

impl Embedding {
    /// Create an embedding; `dimensions` is derived from the vector.
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        let dimensions = vector.len() as u32;
        Self {
            vector,
            model: model.into(),
            dimensions,
            normalized: false,
        }
    }

    /// Validate finiteness and the declared dimensionality.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.vector.is_empty() {
            return Err("embedding vector must not be empty".to_string());
        }
        if self.dimensions as usize != self.vector.len() {
            return Err(format!(
                "declared dimensions {} do not match vector length {}",
                self.dimensions,
                self.vector.len()
            ));
        }
        if self.vector.iter().any(|v| !v.is_finite()) {
            return Err("embedding vector contains NaN or Inf".to_string());
        }
        Ok(())
    }

    /// L2 norm of the vector.
    pub fn l2_norm(&self) -> f32 {
        self.vector.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Rescale the vector to unit L2 norm in place.
    ///
    /// A zero vector is left untouched; the `normalized` flag is set either
    /// way.
    pub fn normalize(&mut self) {
        let norm = self.l2_norm();
        if norm > 0.0 {
            for v in &mut self.vector {
                *v /= norm;
            }
        }
        self.normalized = true;
    }
}

// ============================================================================
// Scope
// ============================================================================

/// The five well-known scope fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeField {
    /// Tenant / organisation boundary.
    Tenant,
    /// End-user boundary.
    User,
    /// Session boundary.
    Session,
    /// Agent boundary.
    Agent,
    /// Conversation-thread boundary.
    Thread,
}

impl ScopeField {
    /// All well-known fields, in canonical order.
    pub const ALL: [ScopeField; 5] = [
        ScopeField::Tenant,
        ScopeField::User,
        ScopeField::Session,
        ScopeField::Agent,
        ScopeField::Thread,
    ];

    /// The canonical field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeField::Tenant => "tenant",
            ScopeField::User => "user",
            ScopeField::Session => "session",
            ScopeField::Agent => "agent",
            ScopeField::Thread => "thread",
        }
    }
}

impl std::fmt::Display for ScopeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hierarchical context identifiers for multi-tenant isolation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Tenant identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// User identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Agent identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Thread identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// Additional caller-defined dimensions. Keys follow metadata-key rules.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, String>,
}

impl Scope {
    /// Empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tenant.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set the user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the session.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Set the agent.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Set the thread.
    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }

    /// Add a custom dimension.
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// The value of a well-known field, when set and non-empty.
    pub fn field(&self, field: ScopeField) -> Option<&str> {
        let value = match field {
            ScopeField::Tenant => &self.tenant,
            ScopeField::User => &self.user,
            ScopeField::Session => &self.session,
            ScopeField::Agent => &self.agent,
            ScopeField::Thread => &self.thread,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// True when no field (well-known or custom) carries a value.
    pub fn is_empty(&self) -> bool {
        ScopeField::ALL.iter().all(|f| self.field(*f).is_none())
            && self.custom.values().all(String::is_empty)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for field in ScopeField::ALL {
            if let Some(value) = self.field(field) {
                let len = value.chars().count();
                if len > MAX_SCOPE_VALUE_LENGTH {
                    return Err(format!(
                        "{field} value length {len} exceeds {MAX_SCOPE_VALUE_LENGTH} characters"
                    ));
                }
            }
        }
        for (key, value) in &self.custom {
            validate_metadata_key(key).map_err(|e| format!("custom key: {e}"))?;
            let len = value.chars().count();
            if len > MAX_SCOPE_VALUE_LENGTH {
                return Err(format!(
                    "custom value length {len} exceeds {MAX_SCOPE_VALUE_LENGTH} characters"
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Temporal
// ============================================================================

/// Timestamps attached to a document.
///
/// `created_at` and `updated_at` are assigned by the engine on ingest when
/// absent; the remaining fields are caller-controlled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temporal {
    /// When the document was first stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the document was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// When the document expires and becomes eligible for sweeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Domain event time, independent of storage time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    /// Start of the validity window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    /// End of the validity window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

impl Temporal {
    /// Empty temporal bundle; the engine stamps it on ingest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit expiry instant.
    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Set the domain event time.
    pub fn with_event_time(mut self, at: DateTime<Utc>) -> Self {
        self.event_time = Some(at);
        self
    }

    /// Set the validity window.
    pub fn with_validity(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.valid_from = Some(from);
        self.valid_until = Some(until);
        self
    }

    /// True when `expires_at` is set and not after `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if let (Some(created), Some(updated)) = (self.created_at, self.updated_at) {
            if updated < created {
                return Err("updated_at must not precede created_at".to_string());
            }
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if until < from {
                return Err("valid_until must not precede valid_from".to_string());
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
