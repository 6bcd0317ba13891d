//! Chat-completion generators.
//!
//! [`OpenAiGenerator`] calls `POST {base}/chat/completions`. HTTP 429 maps to
//! [`PipelineError::GenerationRateLimited`]; every other failure, including a
//! timeout or a response without message content, maps to
//! [`PipelineError::GenerationUnavailable`]. The composer turns either into
//! its fallback reply.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use consult_core::compose::{ChatMessage, Generator};
use consult_core::error::PipelineError;

use crate::config::Config;

const OPENAI_BASE: &str = "https://api.openai.com/v1";

pub fn create_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let gen = &config.generation;
    match gen.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => {
            let api_key = config
                .secrets
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(OpenAiGenerator::new(
                gen.url.clone().unwrap_or_else(|| OPENAI_BASE.to_string()),
                api_key,
                gen.model.clone(),
                gen.temperature,
                gen.max_tokens,
                Duration::from_secs(gen.timeout_secs),
            )?))
        }
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, PipelineError> {
        Err(PipelineError::GenerationUnavailable(
            "generation provider is disabled".into(),
        ))
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature,
            max_tokens,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, PipelineError> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::GenerationUnavailable("chat request timed out".into())
                } else {
                    PipelineError::GenerationUnavailable(format!("chat request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("OpenAI API error {}: {}", status, body);
            return Err(if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                PipelineError::GenerationRateLimited(detail)
            } else {
                PipelineError::GenerationUnavailable(detail)
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            PipelineError::GenerationUnavailable(format!("invalid chat response: {}", e))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PipelineError::GenerationUnavailable("chat response has no content".into()))
    }
}
