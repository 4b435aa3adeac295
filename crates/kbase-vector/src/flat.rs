//! Exact in-memory index persisted as one JSON file per generation.
//!
//! The production backend is LanceDB; this one backs the service tests and
//! builds compiled without the `lance` feature.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use kbase_core::traits::{StoreFactory, VectorStore};
use kbase_core::types::{Chunk, IndexBackend, MetadataFilter, Metric, SearchResult};
use kbase_core::{Error, Result};

use crate::catalog::{write_atomic, IndexCatalog, Manifest, FORMAT_VERSION};
use crate::{check_k, similarity, validate_batch};

pub const CHUNKS_FILE: &str = "chunks.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    seq: u64,
    #[serde(flatten)]
    chunk: Chunk,
}

#[derive(Debug)]
struct FlatState {
    generation: Option<String>,
    dimension: Option<usize>,
    rows: Vec<StoredChunk>,
    next_seq: u64,
    persisted_at: Option<DateTime<Utc>>,
}

pub struct FlatIndex {
    catalog: Arc<IndexCatalog>,
    state: RwLock<FlatState>,
}

impl FlatIndex {
    /// An empty index that has not been persisted yet.
    pub fn new(catalog: Arc<IndexCatalog>) -> Self {
        Self {
            catalog,
            state: RwLock::new(FlatState {
                generation: None,
                dimension: None,
                rows: Vec::new(),
                next_seq: 0,
                persisted_at: None,
            }),
        }
    }

    /// The persisted generation this index is bound to, if any.
    pub async fn generation(&self) -> Option<String> {
        self.state.read().await.generation.clone()
    }

    fn read_rows(&self, manifest: &Manifest) -> Result<Vec<StoredChunk>> {
        let path = self
            .catalog
            .generation_dir(&manifest.generation)
            .join(CHUNKS_FILE);
        let bytes = fs::read(&path)?;
        let rows: Vec<StoredChunk> = serde_json::from_slice(&bytes)?;
        if rows.len() != manifest.chunk_count {
            return Err(Error::IndexUnavailable(format!(
                "{} holds {} chunks, manifest says {}",
                path.display(),
                rows.len(),
                manifest.chunk_count
            )));
        }
        Ok(rows)
    }
}

#[async_trait]
impl VectorStore for FlatIndex {
    fn metric(&self) -> Metric {
        self.catalog.metric()
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let dimension = validate_batch(&chunks, state.dimension)?;
        state.dimension = Some(dimension);
        let added = chunks.len();
        for chunk in chunks {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.rows.push(StoredChunk { seq, chunk });
        }
        debug!(added, total = state.rows.len(), "appended chunks");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>> {
        check_k(k)?;
        let state = self.state.read().await;
        if state.rows.is_empty() || !filter.is_satisfiable() {
            return Ok(Vec::new());
        }
        if let Some(dimension) = state.dimension {
            if query.len() != dimension {
                return Err(Error::InvalidArgument(format!(
                    "query has dimension {}, index dimension is {dimension}",
                    query.len()
                )));
            }
        }

        let metric = self.metric();
        // Rows are in insertion order and the sort is stable, so ties keep it.
        let mut scored: Vec<(f32, &StoredChunk)> = state
            .rows
            .iter()
            .filter(|row| filter.matches(&row.chunk.metadata))
            .map(|row| (similarity(metric, query, &row.chunk.embedding), row))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, row)| SearchResult {
                text: row.chunk.text.clone(),
                metadata: row.chunk.metadata.clone(),
                score,
            })
            .collect())
    }

    /// Writes a new generation directory, so the active one is never modified in place.
    async fn persist(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let generation = self.catalog.new_generation();
        let dir = self.catalog.generation_dir(&generation);
        fs::create_dir_all(&dir)?;
        write_atomic(&dir.join(CHUNKS_FILE), &serde_json::to_vec(&state.rows)?)?;
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            backend: IndexBackend::Flat,
            metric: self.metric(),
            dimension: state.dimension,
            generation,
            chunk_count: state.rows.len(),
            next_seq: state.next_seq,
            updated_at: Utc::now(),
        };
        self.catalog.commit(&manifest)?;
        state.generation = Some(manifest.generation);
        state.persisted_at = Some(manifest.updated_at);
        Ok(())
    }

    async fn fork(&self) -> Result<Arc<dyn VectorStore>> {
        let state = self.state.read().await;
        Ok(Arc::new(Self {
            catalog: Arc::clone(&self.catalog),
            state: RwLock::new(FlatState {
                generation: None,
                dimension: state.dimension,
                rows: state.rows.clone(),
                next_seq: state.next_seq,
                persisted_at: None,
            }),
        }))
    }

    async fn load(&self) -> Result<bool> {
        let manifest = match self.catalog.read_manifest() {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Ok(false),
            Err(Error::IndexUnavailable(reason)) => {
                warn!(%reason, "persisted index unavailable, starting empty");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let rows = match self.read_rows(&manifest) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(generation = %manifest.generation, error = %e, "persisted index unreadable, starting empty");
                return Ok(false);
            }
        };

        let mut state = self.state.write().await;
        state.generation = Some(manifest.generation);
        state.dimension = manifest.dimension;
        state.next_seq = manifest.next_seq;
        state.rows = rows;
        state.persisted_at = Some(manifest.updated_at);
        info!(generation = ?state.generation, chunks = state.rows.len(), "loaded flat index");
        Ok(true)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.rows.len())
    }

    async fn persisted_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.persisted_at
    }
}

pub struct FlatFactory {
    catalog: Arc<IndexCatalog>,
}

impl FlatFactory {
    pub fn new(catalog: Arc<IndexCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl StoreFactory for FlatFactory {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Flat
    }

    fn location(&self) -> &Path {
        self.catalog.root()
    }

    async fn create(&self) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(FlatIndex::new(Arc::clone(&self.catalog))))
    }
}
