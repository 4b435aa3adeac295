use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::types::{Chunk, IndexBackend, MetadataFilter, Metric, SearchResult};

/// Turns text into fixed-length vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// and every vector must have length [`Embedder::dimension`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the model, e.g. for logs and diagnostics.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Provider(format!("{} returned no embedding", self.model_id())))
    }
}

/// A similarity index over embedded chunks, bound to one persisted generation.
///
/// Reads may run concurrently with each other. Writers are serialized by the
/// caller.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn metric(&self) -> Metric;

    /// Appends chunks. Every chunk must carry an embedding of the index dimension.
    async fn add(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Up to `k` results ordered by descending score. Ties keep insertion order.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>>;

    /// Durably writes the current contents and publishes them as the active generation.
    async fn persist(&self) -> Result<()>;

    /// An unpersisted copy bound to a fresh generation.
    ///
    /// Writes to the copy never reach this store or its generation, so a
    /// writer can stage changes and publish them with `persist`.
    async fn fork(&self) -> Result<Arc<dyn VectorStore>>;

    /// Binds to the active persisted generation. `Ok(false)` when there is none
    /// or it cannot be read.
    async fn load(&self) -> Result<bool>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// When the bound generation was last persisted.
    async fn persisted_at(&self) -> Option<DateTime<Utc>>;
}

/// Builds empty stores on fresh generations for one backend and location.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    fn backend(&self) -> IndexBackend;

    fn location(&self) -> &Path;

    async fn create(&self) -> Result<Arc<dyn VectorStore>>;
}
