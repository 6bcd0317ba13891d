//! HTTP embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: always unavailable; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: `POST {base}/embeddings` (OpenAI-compatible API).
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! # Failure mapping
//!
//! | Condition | Error |
//! |-----------|-------|
//! | HTTP 429 | [`PipelineError::EmbeddingRateLimited`] |
//! | Other non-2xx, timeout, connection error | [`PipelineError::EmbeddingUnavailable`] |
//! | Malformed body or wrong dimension | [`PipelineError::EmbeddingUnavailable`] |
//!
//! Providers make exactly one request per call. Query-time callers fall back
//! on failure; ingestion wraps calls in [`crate::retry`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use consult_core::embedding::{check_dims, Embedder};
use consult_core::error::PipelineError;

use crate::config::Config;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_BASE: &str = "http://localhost:11434";

/// Build the embedder selected by `[embedding].provider`.
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let emb = &config.embedding;
    match emb.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => {
            let api_key = config
                .secrets
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(OpenAiEmbedder::new(
                emb.url.clone().unwrap_or_else(|| OPENAI_BASE.to_string()),
                api_key,
                required_model(config)?,
                required_dims(config)?,
                Duration::from_secs(emb.timeout_secs),
            )?))
        }
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(
            emb.url.clone().unwrap_or_else(|| OLLAMA_BASE.to_string()),
            required_model(config)?,
            required_dims(config)?,
            Duration::from_secs(emb.timeout_secs),
        )?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

fn required_model(config: &Config) -> Result<String> {
    config
        .embedding
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for provider '{}'", config.embedding.provider))
}

fn required_dims(config: &Config) -> Result<usize> {
    config
        .embedding
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for provider '{}'", config.embedding.provider))
}

/// Map a non-success HTTP status to the pipeline error kind.
fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> PipelineError {
    let detail = format!("{} API error {}: {}", provider, status, body);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        PipelineError::EmbeddingRateLimited(detail)
    } else {
        PipelineError::EmbeddingUnavailable(detail)
    }
}

fn transport_error(provider: &str, err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::EmbeddingUnavailable(format!("{} request timed out", provider))
    } else {
        PipelineError::EmbeddingUnavailable(format!("{} request failed: {}", provider, err))
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, PipelineError> {
        Err(PipelineError::EmbeddingUnavailable(
            "embedding provider is disabled".into(),
        ))
    }
}

// ============ OpenAI ============

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingDatum>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dims: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&OpenAiEmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| transport_error("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, &body));
        }

        let parsed: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            PipelineError::EmbeddingUnavailable(format!("invalid OpenAI response: {}", e))
        })?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                PipelineError::EmbeddingUnavailable("OpenAI response has no embedding".into())
            })?;
        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

// ============ Ollama ============

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(url: String, model: String, dims: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&OpenAiEmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| {
                PipelineError::EmbeddingUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, &body));
        }

        let parsed: OllamaEmbedResponse = response.json().await.map_err(|e| {
            PipelineError::EmbeddingUnavailable(format!("invalid Ollama response: {}", e))
        })?;
        let vector = parsed.embeddings.into_iter().next().ok_or_else(|| {
            PipelineError::EmbeddingUnavailable("Ollama response has no embedding".into())
        })?;
        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[tokio::test]
    async fn test_disabled_embedder_is_unavailable() {
        let config = parse_config("[db]\npath = \"x.db\"\n").unwrap();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingUnavailable(_)));
    }

    #[test]
    fn test_openai_requires_api_key() {
        let config = parse_config(
            "[db]\npath = \"x.db\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 3\n",
        )
        .unwrap();
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn test_status_mapping() {
        let rl = status_error("OpenAI", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(rl.is_rate_limited());
        let down = status_error("OpenAI", reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(matches!(down, PipelineError::EmbeddingUnavailable(_)));
    }
}
