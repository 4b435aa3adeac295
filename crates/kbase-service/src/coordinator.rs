//! The single writer of the knowledge base.
//!
//! `ingest` appends a directory to a fork of the live index. `refresh`
//! rebuilds the configured docs root into an empty staging index. Either
//! way the new index is swapped in only after it has been persisted. Both hold the writer lock for their whole run; a
//! second caller gets [`Error::Busy`] instead of queueing. Dropping either
//! future cancels the run and leaves the live index as it was.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use kbase_core::chunker::Chunker;
use kbase_core::config::Settings;
use kbase_core::loader::{DocumentLoader, LoadOutcome};
use kbase_core::traits::{Embedder, StoreFactory};
use kbase_core::types::{BatchError, Chunk, IngestMode, IngestionReport, SkippedFile};
use kbase_core::{Error, Result};

use crate::handle::IndexHandle;
use crate::policy::EmbedPolicy;

pub struct IngestionCoordinator {
    docs_root: PathBuf,
    extensions: Vec<String>,
    chunker: Chunker,
    policy: EmbedPolicy,
    embedder: Arc<dyn Embedder>,
    factory: Arc<dyn StoreFactory>,
    index: IndexHandle,
    writer: Mutex<()>,
}

/// Output of the load and chunk phase.
struct Scan {
    documents: usize,
    chunks: Vec<Chunk>,
    skipped: Vec<SkippedFile>,
}

impl IngestionCoordinator {
    pub fn new(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
        factory: Arc<dyn StoreFactory>,
        index: IndexHandle,
    ) -> Result<Self> {
        Ok(Self {
            docs_root: settings.docs_path(),
            extensions: settings.ingest.extensions.clone(),
            chunker: Chunker::from_settings(&settings.chunking)?,
            policy: EmbedPolicy::from_settings(&settings.embedding),
            embedder,
            factory,
            index,
            writer: Mutex::new(()),
        })
    }

    /// True while an ingestion or refresh holds the writer lock.
    pub fn is_busy(&self) -> bool {
        self.writer.try_lock().is_err()
    }

    /// Loads, chunks and embeds everything under `root` and appends it to the live index.
    ///
    /// Documents with a failed embedding batch are left out and listed in the
    /// report; the rest is committed. Fails with `EmbeddingFailure` only when
    /// there was something to embed and every batch failed.
    pub async fn ingest(&self, root: &Path) -> Result<IngestionReport> {
        let _guard = self.writer.try_lock().map_err(|_| Error::Busy)?;
        let started = Instant::now();
        let mut report = IngestionReport::start(IngestMode::Ingest, root);
        info!(root = %root.display(), "ingestion started");

        let chunks = self.load_and_embed(root, &mut report).await?;
        if chunks.is_empty() {
            if let Some(first) = report.errors.first() {
                return Err(Error::EmbeddingFailure {
                    batch: first.batch,
                    message: first.message.clone(),
                });
            }
        }

        let staged = self.index.current().await.fork().await?;
        staged.add(chunks).await?;
        staged.persist().await?;
        self.index.replace(staged).await;

        let report = report.finish();
        info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped.len(),
            failed_batches = report.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Rebuilds the configured docs root into a fresh generation and swaps it in.
    ///
    /// Any failure, including a single failed embedding batch, aborts the
    /// refresh and leaves the previous index live.
    pub async fn refresh(&self) -> Result<IngestionReport> {
        let _guard = self.writer.try_lock().map_err(|_| Error::Busy)?;
        let started = Instant::now();
        let root = self.docs_root.clone();
        let mut report = IngestionReport::start(IngestMode::Refresh, &root);
        info!(root = %root.display(), "refresh started");

        let chunks = self.load_and_embed(&root, &mut report).await?;
        if let Some(first) = report.errors.first() {
            error!(failed_batches = report.errors.len(), "refresh aborted, keeping current index");
            return Err(Error::EmbeddingFailure {
                batch: first.batch,
                message: first.message.clone(),
            });
        }

        let staging = self.factory.create().await?;
        staging.add(chunks).await?;
        staging.persist().await?;
        self.index.replace(staging).await;

        let report = report.finish();
        info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refresh finished, new index is live"
        );
        Ok(report)
    }

    async fn load_and_embed(&self, root: &Path, report: &mut IngestionReport) -> Result<Vec<Chunk>> {
        let scan = self.scan(root).await?;
        report.skipped = scan.skipped;
        let (chunks, errors) = self.embed_all(scan.chunks).await;
        let dropped: BTreeSet<&str> = errors
            .iter()
            .flat_map(|e| e.documents.iter().map(String::as_str))
            .collect();
        report.documents = scan.documents.saturating_sub(dropped.len());
        report.chunks = chunks.len();
        report.errors = errors;
        Ok(chunks)
    }

    /// Walks and chunks `root` on the blocking pool.
    async fn scan(&self, root: &Path) -> Result<Scan> {
        let loader = DocumentLoader::new(root).with_extensions(&self.extensions);
        let chunker = self.chunker;
        tokio::task::spawn_blocking(move || {
            let mut scan = Scan {
                documents: 0,
                chunks: Vec::new(),
                skipped: Vec::new(),
            };
            for outcome in loader.documents()? {
                match outcome {
                    LoadOutcome::Loaded(document) => {
                        let chunks = chunker.chunk(&document);
                        debug!(path = %document.rel_path, chunks = chunks.len(), "chunked document");
                        scan.documents += 1;
                        scan.chunks.extend(chunks);
                    }
                    LoadOutcome::Skipped(skipped) => scan.skipped.push(skipped),
                }
            }
            Ok::<_, Error>(scan)
        })
        .await
        .map_err(|e| Error::Storage(format!("document scan task failed: {e}")))?
    }

    /// Embeds chunks in bounded-concurrency batches.
    ///
    /// Returns the embedded chunks of documents whose batches all succeeded,
    /// in document order, plus one error per failed batch.
    async fn embed_all(&self, chunks: Vec<Chunk>) -> (Vec<Chunk>, Vec<BatchError>) {
        let mut batches: Vec<Vec<Chunk>> = Vec::new();
        let mut rest = chunks.into_iter().peekable();
        while rest.peek().is_some() {
            batches.push(rest.by_ref().take(self.policy.batch_size).collect());
        }
        let total = batches.len();

        let results: Vec<(usize, Vec<Chunk>, Result<Vec<Vec<f32>>>)> = stream::iter(batches.into_iter().enumerate())
            .map(move |(batch_id, batch)| async move {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                let result = self.policy.embed_batch(self.embedder.as_ref(), &texts).await;
                debug!(batch = batch_id, total, ok = result.is_ok(), "embedded batch");
                (batch_id, batch, result)
            })
            .buffered(self.policy.max_concurrency)
            .collect()
            .await;

        let mut failed_sources: HashSet<String> = HashSet::new();
        let mut errors = Vec::new();
        let mut succeeded = Vec::new();
        for (batch_id, batch, result) in results {
            match result {
                Ok(vectors) => succeeded.push((batch, vectors)),
                Err(err) => {
                    let documents: BTreeSet<String> =
                        batch.iter().map(|c| c.metadata.source.clone()).collect();
                    error!(batch = batch_id, documents = documents.len(), error = %err, "embedding batch failed");
                    failed_sources.extend(documents.iter().cloned());
                    errors.push(BatchError {
                        batch: batch_id,
                        documents: documents.into_iter().collect(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let embedded = succeeded
            .into_iter()
            .flat_map(|(batch, vectors)| batch.into_iter().zip(vectors))
            .filter(|(chunk, _)| !failed_sources.contains(&chunk.metadata.source))
            .map(|(mut chunk, vector)| {
                chunk.embedding = vector;
                chunk
            })
            .collect();
        (embedded, errors)
    }
}
