use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use kbase_core::traits::Embedder;
use kbase_core::types::{MetadataFilter, SearchRequest, SearchResult};
use kbase_core::{Error, Result};

use crate::handle::IndexHandle;
use crate::policy::EmbedPolicy;

/// Leading characters of a query written to the search log.
const QUERY_PREVIEW_CHARS: usize = 50;

/// Read side of the knowledge base. Safe to share across tasks.
pub struct RetrievalService {
    index: IndexHandle,
    embedder: Arc<dyn Embedder>,
    policy: EmbedPolicy,
    default_k: usize,
}

impl RetrievalService {
    pub fn new(index: IndexHandle, embedder: Arc<dyn Embedder>, policy: EmbedPolicy, default_k: usize) -> Self {
        Self {
            index,
            embedder,
            policy,
            default_k,
        }
    }

    /// Top `k` chunks for `query`, best first.
    ///
    /// An empty index yields no results without calling the embedder.
    pub async fn search(&self, query: &str, k: usize, filter: &MetadataFilter) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        let started = Instant::now();
        let store = self.index.current().await;
        if store.is_empty().await? {
            debug!("search against empty index");
            return Ok(Vec::new());
        }
        let vector = self.policy.embed_query(self.embedder.as_ref(), query).await?;
        let results = store.search(&vector, k, filter).await?;
        info!(
            query = %query_preview(query),
            k,
            filtered = !filter.is_empty(),
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search"
        );
        Ok(results)
    }

    /// `k` defaults to `search.default_k`; `category` becomes a category filter.
    pub async fn search_request(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let k = request.k.unwrap_or(self.default_k);
        self.search(&request.query, k, &request.filter()).await
    }

    pub fn as_retriever(self: &Arc<Self>, k: usize) -> Retriever {
        self.as_retriever_with_filter(k, MetadataFilter::new())
    }

    pub fn as_retriever_with_filter(self: &Arc<Self>, k: usize, filter: MetadataFilter) -> Retriever {
        Retriever {
            service: Arc::clone(self),
            k,
            filter,
        }
    }
}

/// Query to passages, the shape prompt builders and chat chains consume.
#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>>;
}

/// Fixed `k` and filter bound to a [`RetrievalService`].
#[derive(Clone)]
pub struct Retriever {
    service: Arc<RetrievalService>,
    k: usize,
    filter: MetadataFilter,
}

#[async_trait]
impl Retrieve for Retriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        let results = self.service.search(query, self.k, &self.filter).await?;
        Ok(results.into_iter().map(|r| r.text).collect())
    }
}

fn query_preview(query: &str) -> String {
    query.chars().take(QUERY_PREVIEW_CHARS).collect()
}
