//! Adapter for self-hosted text-embeddings-inference servers.
//!
//! Wire contract: `POST {base}/embed` with
//! `{"inputs": <string | [string]>, "normalize": <bool>?}`, answered by a
//! JSON array of float arrays, one per input, in input order.

use super::{parse_vectors, reject_empty, send_request, EmbedInputs, Embedder};
use crate::context::Context;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// How long the construction-time dimension probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`TeiEmbedder`].
#[derive(Debug, Clone)]
pub struct TeiConfig {
    /// Base URL of the server, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Name reported for the served model.
    pub model_name: String,
    /// Ask the server to L2-normalise returned vectors.
    pub normalize: bool,
}

impl TeiConfig {
    /// Configuration for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_name: "text-embeddings-inference".to_string(),
            normalize: false,
        }
    }

    /// Set the reported model name.
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Request server-side normalisation.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

#[derive(Serialize)]
struct TeiRequest<'a> {
    inputs: EmbedInputs<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    normalize: Option<bool>,
}

/// Embedding backend speaking the text-embeddings-inference protocol.
///
/// The server does not advertise its output dimensionality, so
/// construction issues a bounded probe call; when the probe fails the
/// dimensionality stays 0 and is resolved atomically on the first real
/// call.
pub struct TeiEmbedder {
    client: reqwest::Client,
    config: TeiConfig,
    dimensions: AtomicU32,
}

impl TeiEmbedder {
    /// Validate the configuration and probe the server's dimensionality.
    pub async fn connect(config: TeiConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::InvalidConfiguration(
                "tei base_url must not be empty".to_string(),
            ));
        }

        let embedder = Self {
            client: reqwest::Client::new(),
            config,
            dimensions: AtomicU32::new(0),
        };

        let probe_ctx = Context::with_timeout(PROBE_TIMEOUT);
        match embedder.request(&probe_ctx, EmbedInputs::Single("test")).await {
            Ok(vectors) => {
                let dims = vectors.first().map_or(0, Vec::len) as u32;
                embedder.dimensions.store(dims, Ordering::SeqCst);
                debug!(base_url = %embedder.config.base_url, dims, "probed tei dimensions");
            }
            Err(err) => {
                warn!(
                    base_url = %embedder.config.base_url,
                    error = %err,
                    "tei dimension probe failed; deferring to first call"
                );
            }
        }

        Ok(embedder)
    }

    async fn request(&self, ctx: &Context, inputs: EmbedInputs<'_>) -> Result<Vec<Vec<f32>>> {
        reject_empty(&inputs)?;
        let expected = inputs.len();

        let url = format!("{}/embed", self.config.base_url.trim_end_matches('/'));
        let body = TeiRequest {
            inputs,
            normalize: self.config.normalize.then_some(true),
        };
        let (status, text) = send_request(ctx, self.client.post(&url).json(&body)).await?;
        if status != 200 {
            return Err(Error::backend_status(status, text));
        }

        let vectors = parse_vectors(&text)?;
        if vectors.len() != expected {
            return Err(Error::backend_malformed(format!(
                "expected {expected} embeddings, got {}",
                vectors.len()
            )));
        }

        // Resolve a deferred probe exactly once; concurrent first calls race
        // benignly to the same value.
        if let Some(first) = vectors.first() {
            let _ = self.dimensions.compare_exchange(
                0,
                first.len() as u32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for TeiEmbedder {
    async fn embed(&self, ctx: &Context, text: &str) -> Result<Vec<f32>> {
        let vectors = self.request(ctx, EmbedInputs::Single(text)).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::backend_empty("backend returned no embeddings"))
    }

    async fn embed_batch(&self, ctx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.request(ctx, EmbedInputs::Batch(texts)).await
    }

    fn dimensions(&self) -> u32 {
        self.dimensions.load(Ordering::SeqCst)
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}
