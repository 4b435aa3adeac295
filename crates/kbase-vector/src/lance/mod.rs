//! LanceDB-backed index.
//!
//! Each generation directory is a LanceDB database holding one `chunks`
//! table. Appends go into the table of the bound generation and
//! [`VectorStore::persist`] publishes it through the catalog manifest. Writers
//! append to a [`VectorStore::fork`], which copies the rows into a new
//! generation, so a committed generation is never modified.

mod schema;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::ArrowError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use kbase_core::traits::{StoreFactory, VectorStore};
use kbase_core::types::{Chunk, IndexBackend, MetadataFilter, Metric, SearchResult};
use kbase_core::{Error, Result};

use crate::catalog::{IndexCatalog, Manifest, FORMAT_VERSION};
use crate::filter::{to_predicate, Predicate};
use crate::{check_k, validate_batch};

use self::schema::{rows_from_batch, to_record_batch, TABLE_NAME};

/// Candidates fetched per requested result, so equal scores can be re-ordered by insertion.
const OVERFETCH: usize = 10;

fn storage(e: lancedb::Error) -> Error {
    Error::Storage(e.to_string())
}

fn distance_type(metric: Metric) -> DistanceType {
    match metric {
        Metric::Cosine => DistanceType::Cosine,
        Metric::Dot => DistanceType::Dot,
        Metric::L2 => DistanceType::L2,
    }
}

/// Maps LanceDB's `_distance` onto the same scale the flat index reports.
fn score_from_distance(metric: Metric, distance: f32) -> f32 {
    match metric {
        Metric::Cosine | Metric::Dot => 1.0 - distance,
        Metric::L2 => 1.0 / (1.0 + distance),
    }
}

#[derive(Default)]
struct LanceState {
    generation: Option<String>,
    conn: Option<Connection>,
    dimension: Option<usize>,
    count: usize,
    next_seq: u64,
    persisted_at: Option<DateTime<Utc>>,
}

pub struct LanceIndex {
    catalog: Arc<IndexCatalog>,
    state: RwLock<LanceState>,
}

impl LanceIndex {
    pub fn new(catalog: Arc<IndexCatalog>) -> Self {
        Self {
            catalog,
            state: RwLock::new(LanceState::default()),
        }
    }

    /// Connection to the bound generation, allocating one on first use.
    async fn connection(&self, state: &mut LanceState) -> Result<Connection> {
        if let Some(conn) = &state.conn {
            return Ok(conn.clone());
        }
        let generation = state
            .generation
            .get_or_insert_with(|| self.catalog.new_generation())
            .clone();
        let conn = open_generation(&self.catalog, &generation).await?;
        state.conn = Some(conn.clone());
        Ok(conn)
    }
}

async fn open_generation(catalog: &IndexCatalog, generation: &str) -> Result<Connection> {
    let dir = catalog.generation_dir(generation);
    fs::create_dir_all(&dir)?;
    connect(dir.to_string_lossy().as_ref())
        .execute()
        .await
        .map_err(storage)
}

async fn has_table(conn: &Connection) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(storage)?;
    Ok(names.iter().any(|n| n == TABLE_NAME))
}

#[async_trait]
impl VectorStore for LanceIndex {
    fn metric(&self) -> Metric {
        self.catalog.metric()
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let dimension = validate_batch(&chunks, state.dimension)?;
        let batch = to_record_batch(&chunks, state.next_seq, dimension)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));

        let conn = self.connection(&mut state).await?;
        if has_table(&conn).await? {
            conn.open_table(TABLE_NAME)
                .execute()
                .await
                .map_err(storage)?
                .add(reader)
                .execute()
                .await
                .map_err(storage)?;
        } else {
            conn.create_table(TABLE_NAME, reader)
                .execute()
                .await
                .map_err(storage)?;
        }

        state.dimension = Some(dimension);
        state.count += chunks.len();
        state.next_seq += chunks.len() as u64;
        debug!(added = chunks.len(), total = state.count, "appended chunks");
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
        let predicate = match to_predicate(filter) {
            Predicate::Never => return Ok(Vec::new()),
            Predicate::All => None,
            Predicate::Sql(sql) => Some(sql),
        };
        let Some(conn) = state.conn.as_ref() else {
            return Ok(Vec::new());
        };
        if state.count == 0 {
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
        let table = conn.open_table(TABLE_NAME).execute().await.map_err(storage)?;
        let mut vector_query = table
            .vector_search(query.to_vec())
            .map_err(storage)?
            .distance_type(distance_type(metric))
            .limit(k.saturating_mul(OVERFETCH));
        if let Some(sql) = predicate {
            vector_query = vector_query.only_if(sql);
        }
        let mut stream = vector_query.execute().await.map_err(storage)?;

        let mut rows = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(storage)? {
            rows.extend(rows_from_batch(&batch)?);
        }
        let mut scored: Vec<(f32, i64, SearchResult)> = rows
            .into_iter()
            .map(|row| {
                let score = score_from_distance(metric, row.distance);
                (
                    score,
                    row.seq,
                    SearchResult {
                        text: row.text,
                        metadata: row.metadata,
                        score,
                    },
                )
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, _, result)| result).collect())
    }

    async fn persist(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.connection(&mut state).await?;
        let Some(generation) = state.generation.clone() else {
            return Err(Error::Storage("lance index has no generation".into()));
        };
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            backend: IndexBackend::Lance,
            metric: self.metric(),
            dimension: state.dimension,
            generation,
            chunk_count: state.count,
            next_seq: state.next_seq,
            updated_at: Utc::now(),
        };
        self.catalog.commit(&manifest)?;
        state.persisted_at = Some(manifest.updated_at);
        Ok(())
    }

    async fn fork(&self) -> Result<Arc<dyn VectorStore>> {
        let state = self.state.read().await;
        let generation = self.catalog.new_generation();
        let conn = open_generation(&self.catalog, &generation).await?;
        if let Some(source) = state.conn.as_ref() {
            if state.count > 0 && has_table(source).await? {
                let table = source.open_table(TABLE_NAME).execute().await.map_err(storage)?;
                let schema = table.schema().await.map_err(storage)?;
                let rows = table.count_rows(None).await.map_err(storage)?;
                // Plain queries carry a default limit; copy every row.
                let batches: Vec<RecordBatch> = table
                    .query()
                    .limit(rows)
                    .execute()
                    .await
                    .map_err(storage)?
                    .try_collect()
                    .await
                    .map_err(storage)?;
                let reader = Box::new(RecordBatchIterator::new(
                    batches.into_iter().map(Ok::<_, ArrowError>),
                    schema,
                ));
                conn.create_table(TABLE_NAME, reader)
                    .execute()
                    .await
                    .map_err(storage)?;
            }
        }
        debug!(from = ?state.generation, to = %generation, rows = state.count, "forked lance index");
        Ok(Arc::new(Self {
            catalog: Arc::clone(&self.catalog),
            state: RwLock::new(LanceState {
                generation: Some(generation),
                conn: Some(conn),
                dimension: state.dimension,
                count: state.count,
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

        let opened = async {
            let conn = open_generation(&self.catalog, &manifest.generation).await?;
            let count = if has_table(&conn).await? {
                conn.open_table(TABLE_NAME)
                    .execute()
                    .await
                    .map_err(storage)?
                    .count_rows(None)
                    .await
                    .map_err(storage)?
            } else {
                0
            };
            Ok::<_, Error>((conn, count))
        }
        .await;
        let (conn, count) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(generation = %manifest.generation, error = %e, "persisted index unreadable, starting empty");
                return Ok(false);
            }
        };

        let mut state = self.state.write().await;
        *state = LanceState {
            generation: Some(manifest.generation),
            conn: Some(conn),
            dimension: manifest.dimension,
            count,
            next_seq: manifest.next_seq.max(count as u64),
            persisted_at: Some(manifest.updated_at),
        };
        info!(generation = ?state.generation, chunks = count, "loaded lance index");
        Ok(true)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.count)
    }

    async fn persisted_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.persisted_at
    }
}

pub struct LanceFactory {
    catalog: Arc<IndexCatalog>,
}

impl LanceFactory {
    pub fn new(catalog: Arc<IndexCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl StoreFactory for LanceFactory {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Lance
    }

    fn location(&self) -> &Path {
        self.catalog.root()
    }

    async fn create(&self) -> Result<Arc<dyn VectorStore>> {
        Ok(Arc::new(LanceIndex::new(Arc::clone(&self.catalog))))
    }
}
