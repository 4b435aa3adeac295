//! Embedder backed by an OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! Works against the hosted OpenAI API as well as local servers that speak
//! the same protocol. The API key is read from the env var named in
//! `embedding.api_key_env`; an empty name disables authentication.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use kbase_core::config::EmbeddingSettings;
use kbase_core::traits::Embedder;
use kbase_core::{Error, Result};

pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        api_key: Option<String>,
    ) -> Result<Self> {
        if api_key.as_deref().is_some_and(str::is_empty) {
            return Err(Error::Configuration("embedding API key must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            dimension,
        })
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = if settings.api_key_env.is_empty() {
            None
        } else {
            let key = std::env::var(&settings.api_key_env).map_err(|_| {
                Error::Configuration(format!(
                    "{} environment variable not set",
                    settings.api_key_env
                ))
            })?;
            Some(key)
        };
        Self::new(
            settings.endpoint.clone(),
            settings.model.clone(),
            settings.dimension,
            api_key,
        )
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(batch_size = texts.len(), model = %self.model, "embedding batch");

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            error!(error = %e, "embedding request failed");
            Error::Provider(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(%status, "embedding API error");
            return Err(Error::Provider(format!("API returned {status}: {detail}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("failed to parse response: {e}")))?;
        if parsed.data.len() != texts.len() {
            return Err(Error::Provider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        // Providers may return items out of order; `index` is authoritative.
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
