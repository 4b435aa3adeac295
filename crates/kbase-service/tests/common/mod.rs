#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use kbase_core::config::{ChunkingSettings, EmbeddingProviderKind, Settings};
use kbase_core::traits::Embedder;
use kbase_core::types::IndexBackend;
use kbase_core::{Error, Result};
use kbase_embed::FakeEmbedder;
use kbase_service::KnowledgeBase;
use kbase_vector::open_factory;

pub const DIM: usize = 256;

pub const SQL_SENTENCE: &str = "Joins combine rows from tables. ";
pub const HOME_TEXT: &str = "Welcome to the homestead garden notes page.";

pub struct Workspace {
    pub docs: TempDir,
    pub persist: TempDir,
}

impl Workspace {
    /// `sql/joins.md` (about 600 chars), `home.md` and an unsupported `readme.pdf`.
    pub fn new() -> Self {
        let docs = TempDir::new().unwrap();
        let persist = TempDir::new().unwrap();
        fs::create_dir_all(docs.path().join("sql")).unwrap();
        fs::write(docs.path().join("sql/joins.md"), SQL_SENTENCE.repeat(19)).unwrap();
        fs::write(docs.path().join("home.md"), HOME_TEXT).unwrap();
        fs::write(docs.path().join("readme.pdf"), b"%PDF-1.4 binary").unwrap();
        Self { docs, persist }
    }

    pub fn write(&self, rel: &str, text: &str) {
        let path = self.docs.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, text).unwrap();
    }

    pub fn settings(&self) -> Settings {
        settings(self.docs.path(), self.persist.path())
    }

    pub async fn open(&self, embedder: Arc<dyn Embedder>) -> KnowledgeBase {
        open_with(self.settings(), embedder).await
    }
}

pub fn settings(docs: &Path, persist: &Path) -> Settings {
    let mut s = Settings::default();
    s.ingest.docs_path = docs.display().to_string();
    s.index.persist_dir = persist.display().to_string();
    s.index.backend = IndexBackend::Flat;
    s.chunking = ChunkingSettings {
        chunk_size: 200,
        chunk_overlap: 40,
    };
    s.embedding.provider = EmbeddingProviderKind::Fake;
    s.embedding.dimension = DIM;
    s.embedding.batch_size = 4;
    s.embedding.max_retries = 0;
    s.embedding.retry_backoff_ms = 1;
    s
}

pub async fn open_with(settings: Settings, embedder: Arc<dyn Embedder>) -> KnowledgeBase {
    let factory = open_factory(&settings.index, settings.persist_dir()).unwrap();
    KnowledgeBase::with_components(settings, embedder, factory)
        .await
        .unwrap()
}

pub fn fake() -> Arc<dyn Embedder> {
    Arc::new(FakeEmbedder::new(DIM))
}

/// Counts calls and delegates to the fake embedder.
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_id(&self) -> &str {
        "counting"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FakeEmbedder::new(DIM).embed_batch(texts).await
    }
}

/// Fails or blocks batches containing `trigger` while armed; other texts pass through.
pub struct TriggerEmbedder {
    trigger: String,
    pub fail: AtomicBool,
    pub block: AtomicBool,
    pub entered: Notify,
    pub gate: Semaphore,
}

impl TriggerEmbedder {
    pub fn new(trigger: &str) -> Self {
        Self {
            trigger: trigger.to_string(),
            fail: AtomicBool::new(false),
            block: AtomicBool::new(false),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1_000);
    }
}

#[async_trait]
impl Embedder for TriggerEmbedder {
    fn model_id(&self) -> &str {
        "trigger"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains(&self.trigger)) {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Provider(format!("refusing '{}'", self.trigger)));
            }
            if self.block.load(Ordering::SeqCst) {
                self.entered.notify_one();
                let _permit = self.gate.acquire().await.unwrap();
            }
        }
        FakeEmbedder::new(DIM).embed_batch(texts).await
    }
}

/// Fails the first `failures` calls with a transient error.
pub struct FlakyEmbedder {
    failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_id(&self) -> &str {
        "flaky"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Error::Provider("temporarily unavailable".into()));
        }
        FakeEmbedder::new(DIM).embed_batch(texts).await
    }
}

/// Never answers within any sane timeout.
pub struct SlowEmbedder;

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_id(&self) -> &str {
        "slow"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        FakeEmbedder::new(DIM).embed_batch(texts).await
    }
}

/// Returns vectors of the wrong length.
pub struct WrongDimensionEmbedder;

#[async_trait]
impl Embedder for WrongDimensionEmbedder {
    fn model_id(&self) -> &str {
        "wrong-dimension"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.5; DIM / 2]).collect())
    }
}
