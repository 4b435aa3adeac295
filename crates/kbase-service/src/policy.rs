use std::time::Duration;

use tracing::warn;

use kbase_core::config::EmbeddingSettings;
use kbase_core::traits::Embedder;
use kbase_core::{Error, Result};

/// Batching, timeout and retry rules applied around every embedder call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedPolicy {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub timeout: Duration,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl EmbedPolicy {
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            max_concurrency: settings.max_concurrency.max(1),
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
        }
    }

    /// Embeds one batch, retrying transient failures.
    ///
    /// The result always has one vector of `embedder.dimension()` per text.
    pub async fn embed_batch(&self, embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        let mut delay = self.backoff;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, embedder.embed_batch(texts)).await {
                Ok(result) => result.and_then(|vectors| check_vectors(embedder, texts.len(), vectors)),
                Err(_) => Err(Error::Timeout(self.timeout)),
            };
            match outcome {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && attempt <= self.max_retries => {
                    warn!(attempt, error = %err, retry_in_ms = delay.as_millis() as u64, "embedding call failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn embed_query(&self, embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(embedder, &[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Provider("embedder returned no vector for the query".into()))
    }
}

fn check_vectors(embedder: &dyn Embedder, expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(Error::Provider(format!(
            "{} returned {} vectors for {expected} texts",
            embedder.model_id(),
            vectors.len()
        )));
    }
    let dimension = embedder.dimension();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(Error::InvalidArgument(format!(
            "{} returned a vector of dimension {}, expected {dimension}",
            embedder.model_id(),
            bad.len()
        )));
    }
    Ok(vectors)
}
