//! Generation directories and the manifest that points at the active one.
//!
//! Layout under the persist dir:
//!
//! ```text
//! manifest.json          active generation, metric, backend, counts
//! gen-<ts>-<n>/          one directory per persisted generation
//! ```
//!
//! A generation is written in full before the manifest is replaced with a
//! tmp-file rename, so readers see either the old or the new generation.
//! After a commit only the active and the previously active generation are
//! kept.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kbase_core::types::{IndexBackend, Metric};
use kbase_core::{Error, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub backend: IndexBackend,
    pub metric: Metric,
    pub dimension: Option<usize>,
    pub generation: String,
    pub chunk_count: usize,
    pub next_seq: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct IndexCatalog {
    root: PathBuf,
    backend: IndexBackend,
    metric: Metric,
    counter: AtomicU64,
}

impl IndexCatalog {
    pub fn new(root: impl Into<PathBuf>, backend: IndexBackend, metric: Metric) -> Self {
        Self {
            root: root.into(),
            backend,
            metric,
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backend(&self) -> IndexBackend {
        self.backend
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn generation_dir(&self, generation: &str) -> PathBuf {
        self.root.join(generation)
    }

    /// A name no other generation in this process will get.
    pub fn new_generation(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "{GENERATION_PREFIX}{}-{n}",
            Utc::now().format("%Y%m%d%H%M%S%3f")
        )
    }

    /// The active manifest.
    ///
    /// `Ok(None)` when nothing has been persisted, `IndexUnavailable` when the
    /// manifest cannot be read or belongs to another backend or format, and
    /// `MetricMismatch` when it was written with a different metric.
    pub fn read_manifest(&self) -> Result<Option<Manifest>> {
        let path = self.manifest_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::IndexUnavailable(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| {
            Error::IndexUnavailable(format!("corrupt manifest {}: {e}", path.display()))
        })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::IndexUnavailable(format!(
                "unsupported manifest format {}",
                manifest.format_version
            )));
        }
        if manifest.backend != self.backend {
            return Err(Error::IndexUnavailable(format!(
                "persisted index was written by the {} backend, configured backend is {}",
                manifest.backend, self.backend
            )));
        }
        if manifest.metric != self.metric {
            return Err(Error::MetricMismatch {
                stored: manifest.metric,
                configured: self.metric,
            });
        }
        Ok(Some(manifest))
    }

    /// Publishes `manifest` and prunes generations other than it and the one it replaced.
    pub fn commit(&self, manifest: &Manifest) -> Result<()> {
        let previous = self.read_manifest().ok().flatten().map(|m| m.generation);

        fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)?;
        fs::rename(&tmp, self.manifest_path())?;
        info!(
            generation = %manifest.generation,
            chunks = manifest.chunk_count,
            "committed index generation"
        );

        self.prune(&manifest.generation, previous.as_deref());
        Ok(())
    }

    /// Generation directory names currently on disk, sorted.
    pub fn generations(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(GENERATION_PREFIX) && entry.file_type()?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn prune(&self, active: &str, previous: Option<&str>) {
        let names = match self.generations() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "failed to list generations for pruning");
                return;
            }
        };
        for name in names {
            if name == active || Some(name.as_str()) == previous {
                continue;
            }
            let dir = self.generation_dir(&name);
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!(generation = %name, "pruned generation"),
                Err(e) => warn!(generation = %name, error = %e, "failed to prune generation"),
            }
        }
    }
}

/// Writes `bytes` to `path` through a sibling tmp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(generation: &str, metric: Metric) -> Manifest {
        Manifest {
            format_version: FORMAT_VERSION,
            backend: IndexBackend::Flat,
            metric,
            dimension: Some(4),
            generation: generation.to_string(),
            chunk_count: 0,
            next_seq: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn generation_names_are_unique() {
        let catalog = IndexCatalog::new("/tmp/x", IndexBackend::Flat, Metric::Cosine);
        assert_ne!(catalog.new_generation(), catalog.new_generation());
    }

    #[test]
    fn commit_keeps_active_and_previous() {
        let tmp = TempDir::new().unwrap();
        let catalog = IndexCatalog::new(tmp.path(), IndexBackend::Flat, Metric::Cosine);
        let gens: Vec<String> = (0..3).map(|_| catalog.new_generation()).collect();
        for g in &gens {
            fs::create_dir_all(catalog.generation_dir(g)).unwrap();
            catalog.commit(&manifest(g, Metric::Cosine)).unwrap();
        }
        assert_eq!(catalog.generations().unwrap(), gens[1..].to_vec());
        assert_eq!(catalog.read_manifest().unwrap().unwrap().generation, gens[2]);
    }

    #[test]
    fn metric_mismatch_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let writer = IndexCatalog::new(tmp.path(), IndexBackend::Flat, Metric::Dot);
        writer.commit(&manifest("gen-a", Metric::Dot)).unwrap();

        let reader = IndexCatalog::new(tmp.path(), IndexBackend::Flat, Metric::Cosine);
        assert!(matches!(
            reader.read_manifest(),
            Err(Error::MetricMismatch { stored: Metric::Dot, configured: Metric::Cosine })
        ));
    }

    #[test]
    fn corrupt_manifest_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILE), b"{not json").unwrap();
        let catalog = IndexCatalog::new(tmp.path(), IndexBackend::Flat, Metric::Cosine);
        assert!(matches!(catalog.read_manifest(), Err(Error::IndexUnavailable(_))));
    }
}
