use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category assigned to files that sit directly under the docs root.
pub const ROOT_CATEGORY: &str = "general";

/// Stable identifier of a chunk, derived from its source path and position.
pub type ChunkId = String;

/// A source file that passed the loader's extension filter and decoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    /// Path relative to the docs root, `/`-separated.
    pub rel_path: String,
    pub raw_text: String,
    pub category: String,
    /// Lowercased extension without the dot.
    pub extension: String,
}

impl Document {
    pub fn source(&self) -> String {
        self.path.display().to_string()
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub category: String,
    pub filename: String,
    pub rel_path: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Character offset of the chunk start in the document text.
    pub start: usize,
    /// Character offset one past the chunk end.
    pub end: usize,
}

impl ChunkMetadata {
    pub const FIELDS: [&'static str; 8] = [
        "source",
        "category",
        "filename",
        "rel_path",
        "chunk_index",
        "total_chunks",
        "start",
        "end",
    ];

    /// String form of a metadata field, `None` when `key` is not a field.
    pub fn field(&self, key: &str) -> Option<String> {
        let value = match key {
            "source" => self.source.clone(),
            "category" => self.category.clone(),
            "filename" => self.filename.clone(),
            "rel_path" => self.rel_path.clone(),
            "chunk_index" => self.chunk_index.to_string(),
            "total_chunks" => self.total_chunks.to_string(),
            "start" => self.start.to_string(),
            "end" => self.end.to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub fn is_field(key: &str) -> bool {
        Self::FIELDS.contains(&key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Empty until the chunk has been embedded.
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// Exact-match constraints on chunk metadata. All pairs must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, String>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self::new().with("category", category)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// False when a key names no metadata field; such a filter matches nothing.
    pub fn is_satisfiable(&self) -> bool {
        self.0.keys().all(|k| ChunkMetadata::is_field(k))
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.0
            .iter()
            .all(|(key, want)| metadata.field(key).is_some_and(|have| &have == want))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Dot,
    L2,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::L2 => "l2",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Exact in-memory index persisted as JSON. For tests and builds without LanceDB.
    Flat,
    #[default]
    Lance,
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => f.write_str("flat"),
            Self::Lance => f.write_str("lance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Ingest,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

impl SkippedFile {
    pub fn new(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub batch: usize,
    /// Sources whose chunks were dropped because of this batch.
    pub documents: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub mode: IngestMode,
    pub root: PathBuf,
    pub documents: usize,
    pub chunks: usize,
    pub skipped: Vec<SkippedFile>,
    pub errors: Vec<BatchError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestionReport {
    pub fn start(mode: IngestMode, root: &Path) -> Self {
        let now = Utc::now();
        Self {
            mode,
            root: root.to_path_buf(),
            documents: 0,
            chunks: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[must_use]
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub loaded: bool,
    pub chunk_count: usize,
    pub last_ingested_at: Option<DateTime<Utc>>,
    pub metric: Metric,
    pub backend: IndexBackend,
    pub persist_dir: PathBuf,
}

/// Query-shaped input for callers that speak in categories rather than filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            k: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn filter(&self) -> MetadataFilter {
        self.category
            .as_ref()
            .map_or_else(MetadataFilter::new, MetadataFilter::category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(category: &str, index: usize) -> ChunkMetadata {
        ChunkMetadata {
            source: format!("/docs/{category}/a.md"),
            category: category.to_string(),
            filename: "a.md".to_string(),
            rel_path: format!("{category}/a.md"),
            chunk_index: index,
            total_chunks: 3,
            start: 0,
            end: 10,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(MetadataFilter::new().matches(&meta("sql", 0)));
    }

    #[test]
    fn filter_compares_string_forms() {
        let f = MetadataFilter::category("sql").with("chunk_index", "1");
        assert!(f.matches(&meta("sql", 1)));
        assert!(!f.matches(&meta("sql", 2)));
        assert!(!f.matches(&meta("general", 1)));
    }

    #[test]
    fn unknown_key_matches_nothing() {
        let f = MetadataFilter::new().with("author", "me");
        assert!(!f.is_satisfiable());
        assert!(!f.matches(&meta("sql", 0)));
    }

    #[test]
    fn search_request_maps_category_to_filter() {
        let req = SearchRequest::new("joins").with_category("sql");
        assert_eq!(req.filter(), MetadataFilter::category("sql"));
        assert!(SearchRequest::new("joins").filter().is_empty());
    }

    #[test]
    fn metric_serializes_lowercase() {
        let json = serde_json::to_string(&Metric::L2).expect("serialize");
        assert_eq!(json, "\"l2\"");
        assert_eq!(Metric::Dot.to_string(), "dot");
    }
}
