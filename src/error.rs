//! Error types for vellum.

use thiserror::Error;

/// Result type for vellum operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vellum operations.
///
/// The taxonomy is closed: every failure surfaced by the store, a
/// collection, or an embedding backend adapter maps onto exactly one of
/// these variants.
#[derive(Error, Debug)]
pub enum Error {
    /// Options or configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A document failed field-level validation.
    #[error("invalid document at index {index} ({field}): {reason}")]
    InvalidDocument {
        /// Position of the document in the input slice.
        index: usize,
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable description of the violation.
        reason: String,
    },

    /// Declared and actual vector dimensionality differ.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality declared by the collection or embedding.
        expected: u32,
        /// Dimensionality actually provided.
        actual: u32,
    },

    /// A collection-required scope field is absent or empty.
    #[error("missing required scope field '{field}'")]
    MissingRequiredScope {
        /// The scope field the collection policy requires.
        field: &'static str,
    },

    /// Query parameters failed validation.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A named resource (typically a collection) does not exist.
    #[error("'{0}' not found")]
    NotFound(String),

    /// The collection document cap was reached and eviction is disabled.
    #[error("collection document limit of {limit} reached")]
    LimitExceeded {
        /// The configured maximum document count.
        limit: usize,
    },

    /// The operation's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An embedding backend adapter failed.
    #[error("backend failure ({kind}, status {status:?}): {message}")]
    BackendFailure {
        /// What class of failure occurred.
        kind: BackendErrorKind,
        /// HTTP status code, when the backend responded at all.
        status: Option<u16>,
        /// Description, including the response body for HTTP errors.
        message: String,
        /// The underlying transport or decoding error, when available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The store has been closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,
}

/// Classification of embedding backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The request never completed (DNS, connect, TLS, I/O).
    Network,
    /// The backend answered with a non-2xx status.
    Status,
    /// The response body could not be decoded as the expected JSON shape.
    MalformedResponse,
    /// The backend returned a structurally valid but empty result.
    EmptyResponse,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendErrorKind::Network => "network",
            BackendErrorKind::Status => "status",
            BackendErrorKind::MalformedResponse => "malformed response",
            BackendErrorKind::EmptyResponse => "empty response",
        };
        write!(f, "{name}")
    }
}

impl Error {
    /// Construct an [`Error::InvalidDocument`] for the document at `index`.
    pub fn invalid_document(index: usize, field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidDocument {
            index,
            field,
            reason: reason.into(),
        }
    }

    /// Construct a network-class [`Error::BackendFailure`].
    pub fn backend_network(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::BackendFailure {
            kind: BackendErrorKind::Network,
            status: None,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Construct a status-class [`Error::BackendFailure`] carrying the
    /// response status and body.
    pub fn backend_status(status: u16, body: impl Into<String>) -> Self {
        Error::BackendFailure {
            kind: BackendErrorKind::Status,
            status: Some(status),
            message: body.into(),
            source: None,
        }
    }

    /// Construct a malformed-response [`Error::BackendFailure`].
    pub fn backend_malformed(message: impl Into<String>) -> Self {
        Error::BackendFailure {
            kind: BackendErrorKind::MalformedResponse,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    /// Construct an empty-response [`Error::BackendFailure`].
    pub fn backend_empty(message: impl Into<String>) -> Self {
        Error::BackendFailure {
            kind: BackendErrorKind::EmptyResponse,
            status: None,
            message: message.into(),
            source: None,
        }
    }

    /// True when the error signals cancellation or an elapsed deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = Error::backend_status(503, "service unavailable");
        let text = err.to_string();
        assert!(text.contains("503"));
        assert!(text.contains("service unavailable"));
    }

    #[test]
    fn test_invalid_document_display() {
        let err = Error::invalid_document(3, "id", "must not be empty");
        assert_eq!(
            err.to_string(),
            "invalid document at index 3 (id): must not be empty"
        );
    }

    #[test]
    fn test_is_cancellation() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::Closed.is_cancellation());
    }
}
