use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use kbase_core::config::Settings;
use kbase_core::traits::{Embedder, StoreFactory};
use kbase_core::types::{IndexStatus, IngestionReport, MetadataFilter, SearchRequest, SearchResult};
use kbase_core::{Error, Result};
use kbase_embed::get_default_embedder;
use kbase_vector::open_factory;

use crate::coordinator::IngestionCoordinator;
use crate::handle::IndexHandle;
use crate::policy::EmbedPolicy;
use crate::retrieval::RetrievalService;

/// How the index came up at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartupOutcome {
    /// A non-empty persisted index was loaded.
    Loaded { chunks: usize },
    /// Nothing usable was persisted, so the docs root was ingested.
    Ingested(IngestionReport),
    /// Initial ingestion failed; serving an empty index.
    Empty { reason: String },
}

/// Application context: settings, the live index and the services over it.
pub struct KnowledgeBase {
    settings: Settings,
    factory: Arc<dyn StoreFactory>,
    index: IndexHandle,
    coordinator: Arc<IngestionCoordinator>,
    retrieval: Arc<RetrievalService>,
}

impl KnowledgeBase {
    /// Builds the configured embedder and backend. Does not touch the persisted index.
    pub async fn open(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let embedder = get_default_embedder(&settings.embedding)?;
        let factory = open_factory(&settings.index, settings.persist_dir())?;
        Self::with_components(settings, embedder, factory).await
    }

    pub async fn with_components(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        factory: Arc<dyn StoreFactory>,
    ) -> Result<Self> {
        settings.validate()?;
        let index = IndexHandle::new(factory.create().await?);
        let policy = EmbedPolicy::from_settings(&settings.embedding);
        let coordinator = Arc::new(IngestionCoordinator::new(
            &settings,
            Arc::clone(&embedder),
            Arc::clone(&factory),
            index.clone(),
        )?);
        let retrieval = Arc::new(RetrievalService::new(
            index.clone(),
            embedder,
            policy,
            settings.search.default_k,
        ));
        Ok(Self {
            settings,
            factory,
            index,
            coordinator,
            retrieval,
        })
    }

    /// Opens and runs the startup sequence.
    pub async fn start(settings: Settings) -> Result<(Self, StartupOutcome)> {
        let kb = Self::open(settings).await?;
        let outcome = kb.startup().await?;
        Ok((kb, outcome))
    }

    /// Loads the persisted index, or ingests the docs root when there is none
    /// or it is empty.
    ///
    /// A metric mismatch or a missing docs root is fatal. Any other ingestion
    /// failure is logged and the service continues with an empty index.
    pub async fn startup(&self) -> Result<StartupOutcome> {
        if self.load().await? {
            let chunks = self.index.current().await.len().await?;
            if chunks > 0 {
                info!(chunks, "serving persisted index");
                return Ok(StartupOutcome::Loaded { chunks });
            }
            warn!("persisted index is empty, ingesting docs");
        }

        let root = self.settings.docs_path();
        match self.coordinator.ingest(&root).await {
            Ok(report) => Ok(StartupOutcome::Ingested(report)),
            Err(e @ Error::Configuration(_)) => Err(e),
            Err(e) => {
                error!(error = %e, root = %root.display(), "initial ingestion failed, serving an empty index");
                Ok(StartupOutcome::Empty {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Binds the live index to the persisted one, if any.
    pub async fn load(&self) -> Result<bool> {
        self.index.current().await.load().await
    }

    pub async fn ingest(&self, root: &Path) -> Result<IngestionReport> {
        self.coordinator.ingest(root).await
    }

    pub async fn refresh(&self) -> Result<IngestionReport> {
        self.coordinator.refresh().await
    }

    pub async fn search(&self, query: &str, k: usize, filter: &MetadataFilter) -> Result<Vec<SearchResult>> {
        self.retrieval.search(query, k, filter).await
    }

    pub async fn search_request(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        self.retrieval.search_request(request).await
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let store = self.index.current().await;
        let last_ingested_at = store.persisted_at().await;
        Ok(IndexStatus {
            loaded: last_ingested_at.is_some(),
            chunk_count: store.len().await?,
            last_ingested_at,
            metric: store.metric(),
            backend: self.factory.backend(),
            persist_dir: self.factory.location().to_path_buf(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn coordinator(&self) -> &Arc<IngestionCoordinator> {
        &self.coordinator
    }

    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.retrieval
    }
}
