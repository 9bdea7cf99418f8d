//! Embedding backend adapters.
//!
//! The engine treats embedding generation as a pluggable upstream: an
//! [`Embedder`] turns text into vectors over HTTP. Two backends are built
//! in, selected through the closed [`EmbedderProvider`] enum — a
//! text-embeddings-inference style self-hosted server ([`TeiEmbedder`]) and
//! a hosted inference API with bearer auth ([`InferenceApiEmbedder`]).
//! Implementing [`Embedder`] directly is the extension hook for everything
//! else.

mod inference;
mod tei;

pub use inference::{InferenceApiConfig, InferenceApiEmbedder};
pub use tei::{TeiConfig, TeiEmbedder};

use crate::context::Context;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Fallback dimensionality for unknown models on a remote inference API.
pub const REMOTE_INFERENCE_DEFAULT_DIMENSIONS: u32 = 768;

/// Fallback dimensionality for unknown models in the hosted API family.
pub const HOSTED_API_DEFAULT_DIMENSIONS: u32 = 1536;

/// A text embedding backend.
///
/// Implementations must be safe to share across tasks; the collection
/// engine calls them before taking any lock.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Rejects empty input with [`Error::InvalidQuery`]; backend failures
    /// surface as [`Error::BackendFailure`] with an unambiguous kind.
    async fn embed(&self, ctx: &Context, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, one vector per input in input order.
    async fn embed_batch(&self, ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The backend's output dimensionality; 0 when not yet known.
    fn dimensions(&self) -> u32;

    /// Identifier of the model this backend serves.
    fn model_name(&self) -> &str;

    /// Release backend resources. The default is a no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The built-in embedding backends.
#[derive(Debug, Clone)]
pub enum EmbedderProvider {
    /// A self-hosted text-embeddings-inference server.
    Tei(TeiConfig),
    /// A remote inference API with optional bearer auth.
    InferenceApi(InferenceApiConfig),
}

impl EmbedderProvider {
    /// Construct the configured backend.
    ///
    /// Construction may probe the backend to learn its dimensionality; a
    /// failed probe is logged and deferred to the first real call.
    pub async fn build(&self) -> Result<Arc<dyn Embedder>> {
        match self {
            EmbedderProvider::Tei(config) => {
                Ok(Arc::new(TeiEmbedder::connect(config.clone()).await?))
            }
            EmbedderProvider::InferenceApi(config) => {
                Ok(Arc::new(InferenceApiEmbedder::new(config.clone())?))
            }
        }
    }
}

/// Vector dimensionality of well-known embedding models.
///
/// Used when no probe call is possible; unknown models fall back to
/// [`REMOTE_INFERENCE_DEFAULT_DIMENSIONS`] or
/// [`HOSTED_API_DEFAULT_DIMENSIONS`] depending on the adapter family.
pub fn known_model_dimensions(model: &str) -> Option<u32> {
    let dims = match model {
        "BAAI/bge-small-en-v1.5" => 384,
        "BAAI/bge-base-en-v1.5" => 768,
        "BAAI/bge-large-en-v1.5" => 1024,
        "sentence-transformers/all-MiniLM-L6-v2" => 384,
        "sentence-transformers/all-MiniLM-L12-v2" => 384,
        "sentence-transformers/all-mpnet-base-v2" => 768,
        "intfloat/multilingual-e5-small" => 384,
        "intfloat/multilingual-e5-base" => 768,
        "intfloat/multilingual-e5-large" => 1024,
        "nomic-ai/nomic-embed-text-v1" => 768,
        "nomic-ai/nomic-embed-text-v1.5" => 768,
        "mixedbread-ai/mxbai-embed-large-v1" => 1024,
        "jinaai/jina-embeddings-v2-base-code" => 768,
        "text-embedding-ada-002" => 1536,
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        _ => return None,
    };
    Some(dims)
}

// ============================================================================
// Shared HTTP plumbing
// ============================================================================

/// Request inputs: a single string or a batch, matching both wire formats.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum EmbedInputs<'a> {
    /// One text.
    Single(&'a str),
    /// Several texts, order-preserving.
    Batch(&'a [String]),
}

impl EmbedInputs<'_> {
    pub(crate) fn len(&self) -> usize {
        match self {
            EmbedInputs::Single(_) => 1,
            EmbedInputs::Batch(texts) => texts.len(),
        }
    }
}

/// Send a JSON request honouring the context's cancellation and deadline.
///
/// Returns the status and raw body; callers decide how to decode.
pub(crate) async fn send_request(
    ctx: &Context,
    builder: reqwest::RequestBuilder,
) -> Result<(u16, String)> {
    ctx.check()?;
    let builder = match ctx.remaining() {
        Some(remaining) if remaining.is_zero() => return Err(Error::DeadlineExceeded),
        Some(remaining) => builder.timeout(remaining),
        None => builder,
    };

    let response = tokio::select! {
        _ = ctx.cancelled() => return Err(Error::Cancelled),
        result = builder.send() => result.map_err(map_transport_error)?,
    };

    let status = response.status().as_u16();
    let body = tokio::select! {
        _ = ctx.cancelled() => return Err(Error::Cancelled),
        result = response.text() => result.map_err(map_transport_error)?,
    };

    Ok((status, body))
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::DeadlineExceeded
    } else {
        Error::backend_network(err)
    }
}

/// Decode a response body that is either an array of vectors or a single
/// vector (reshaped into a one-element batch).
pub(crate) fn parse_vectors(body: &str) -> Result<Vec<Vec<f32>>> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Error::backend_malformed(format!("response is not JSON: {e}")))?;

    let serde_json::Value::Array(items) = value else {
        return Err(Error::backend_malformed("expected a JSON array"));
    };
    if items.is_empty() {
        return Err(Error::backend_empty("backend returned no embeddings"));
    }

    if items[0].is_array() {
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<Vec<f32>>(item)
                    .map_err(|e| Error::backend_malformed(format!("inner array: {e}")))
            })
            .collect()
    } else {
        let vector = items
            .into_iter()
            .map(|item| {
                item.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| Error::backend_malformed("expected numeric components"))
            })
            .collect::<Result<Vec<f32>>>()?;
        Ok(vec![vector])
    }
}

/// Reject empty embed inputs before any network round trip.
pub(crate) fn reject_empty(inputs: &EmbedInputs<'_>) -> Result<()> {
    let empty = match inputs {
        EmbedInputs::Single(text) => text.is_empty(),
        EmbedInputs::Batch(texts) => texts.is_empty(),
    };
    if empty {
        return Err(Error::InvalidQuery(
            "embedding input must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_dimensions() {
        assert_eq!(
            known_model_dimensions("BAAI/bge-small-en-v1.5"),
            Some(384)
        );
        assert_eq!(known_model_dimensions("text-embedding-3-large"), Some(3072));
        assert_eq!(known_model_dimensions("made-up/model"), None);
    }

    #[test]
    fn test_parse_nested_vectors() {
        let vectors = parse_vectors("[[1.0, 2.0], [3.0, 4.0]]").unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_parse_single_vector_reshapes() {
        let vectors = parse_vectors("[1.0, 2.0, 3.0]").unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_vectors("not json"),
            Err(Error::BackendFailure { .. })
        ));
        assert!(matches!(
            parse_vectors("{\"error\": \"x\"}"),
            Err(Error::BackendFailure { .. })
        ));
        assert!(matches!(
            parse_vectors("[]"),
            Err(Error::BackendFailure { .. })
        ));
    }

    #[test]
    fn test_reject_empty_inputs() {
        assert!(reject_empty(&EmbedInputs::Single("")).is_err());
        assert!(reject_empty(&EmbedInputs::Batch(&[])).is_err());
        assert!(reject_empty(&EmbedInputs::Single("hi")).is_ok());
    }

    #[test]
    fn test_inputs_serialize_shape() {
        let single = serde_json::to_string(&EmbedInputs::Single("hi")).unwrap();
        assert_eq!(single, "\"hi\"");
        let texts = vec!["a".to_string(), "b".to_string()];
        let batch = serde_json::to_string(&EmbedInputs::Batch(&texts)).unwrap();
        assert_eq!(batch, "[\"a\",\"b\"]");
    }
}
