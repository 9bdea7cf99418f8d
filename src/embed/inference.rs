//! Adapter for remote inference APIs.
//!
//! Wire contract: `POST {base}/models/{model}` with optional bearer
//! authorization and `{"inputs": <string | [string]>, "options":
//! {"wait_for_model": <bool>, "use_cache": <bool>}}`. The response is
//! either an array of float arrays or a single float array, which is
//! reshaped into a one-element batch.

use super::{
    known_model_dimensions, parse_vectors, reject_empty, send_request, EmbedInputs, Embedder,
    REMOTE_INFERENCE_DEFAULT_DIMENSIONS,
};
use crate::context::Context;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;

/// Configuration for an [`InferenceApiEmbedder`].
#[derive(Debug, Clone)]
pub struct InferenceApiConfig {
    /// Base URL of the API, e.g. `https://router.huggingface.co/hf-inference`.
    pub base_url: String,
    /// Model identifier appended to the URL path.
    pub model: String,
    /// Bearer token, when the API requires authentication.
    pub api_token: Option<String>,
    /// Ask the backend to block until the model is loaded.
    pub wait_for_model: bool,
    /// Allow the backend to serve cached results.
    pub use_cache: bool,
}

impl InferenceApiConfig {
    /// Configuration for `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_token: None,
            wait_for_model: true,
            use_cache: true,
        }
    }

    /// Authenticate with a bearer token.
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: EmbedInputs<'a>,
    options: InferenceOptions,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
    use_cache: bool,
}

/// Embedding backend speaking the remote inference API protocol.
///
/// Dimensionality comes from the known-model table; unknown models fall
/// back to [`REMOTE_INFERENCE_DEFAULT_DIMENSIONS`].
pub struct InferenceApiEmbedder {
    client: reqwest::Client,
    config: InferenceApiConfig,
    dimensions: u32,
}

impl InferenceApiEmbedder {
    /// Validate the configuration and resolve the model's dimensionality.
    pub fn new(config: InferenceApiConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(Error::InvalidConfiguration(
                "inference api base_url must not be empty".to_string(),
            ));
        }
        if config.model.is_empty() {
            return Err(Error::InvalidConfiguration(
                "inference api model must not be empty".to_string(),
            ));
        }

        let dimensions = known_model_dimensions(&config.model)
            .unwrap_or(REMOTE_INFERENCE_DEFAULT_DIMENSIONS);

        Ok(Self {
            client: reqwest::Client::new(),
            config,
            dimensions,
        })
    }

    async fn request(&self, ctx: &Context, inputs: EmbedInputs<'_>) -> Result<Vec<Vec<f32>>> {
        reject_empty(&inputs)?;
        let expected = inputs.len();

        let url = format!(
            "{}/models/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let body = InferenceRequest {
            inputs,
            options: InferenceOptions {
                wait_for_model: self.config.wait_for_model,
                use_cache: self.config.use_cache,
            },
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(token) = &self.config.api_token {
            builder = builder.bearer_auth(token);
        }

        let (status, text) = send_request(ctx, builder).await?;
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
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for InferenceApiEmbedder {
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
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
