#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Similarity index backends and the on-disk generation catalog they share.
//!
//! `lance` (the default `lance` feature) stores each generation as a LanceDB
//! table. `flat` is an exact in-memory index persisted as JSON, used by tests
//! and by builds without LanceDB. Both publish
//! generations through [`catalog::IndexCatalog`].

use std::path::PathBuf;
use std::sync::Arc;

use kbase_core::config::IndexSettings;
use kbase_core::traits::StoreFactory;
use kbase_core::types::{Chunk, IndexBackend, Metric};
use kbase_core::{Error, Result};

pub mod catalog;
pub mod filter;
pub mod flat;
#[cfg(feature = "lance")]
pub mod lance;

pub use catalog::{IndexCatalog, Manifest};
pub use flat::{FlatFactory, FlatIndex};

/// Factory for the configured backend rooted at `persist_dir`.
pub fn open_factory(settings: &IndexSettings, persist_dir: PathBuf) -> Result<Arc<dyn StoreFactory>> {
    let catalog = Arc::new(IndexCatalog::new(persist_dir, settings.backend, settings.metric));
    match settings.backend {
        IndexBackend::Flat => Ok(Arc::new(FlatFactory::new(catalog))),
        #[cfg(feature = "lance")]
        IndexBackend::Lance => Ok(Arc::new(lance::LanceFactory::new(catalog))),
        #[cfg(not(feature = "lance"))]
        IndexBackend::Lance => Err(Error::Configuration(
            "index.backend = \"lance\" requires building with the `lance` feature".into(),
        )),
    }
}

/// Similarity score where larger means closer.
pub fn similarity(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::Cosine => {
            let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
            for (x, y) in a.iter().zip(b) {
                dot += x * y;
                na += x * x;
                nb += y * y;
            }
            let denom = na.sqrt() * nb.sqrt();
            if denom == 0.0 {
                0.0
            } else {
                dot / denom
            }
        }
        Metric::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        Metric::L2 => {
            let dist: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
            1.0 / (1.0 + dist)
        }
    }
}

/// Checks a batch before it is appended and returns its embedding dimension.
pub(crate) fn validate_batch(chunks: &[Chunk], dimension: Option<usize>) -> Result<usize> {
    let expected = dimension
        .or_else(|| chunks.first().map(|c| c.embedding.len()))
        .unwrap_or(0);
    for chunk in chunks {
        if chunk.embedding.is_empty() {
            return Err(Error::InvalidArgument(format!("chunk {} has no embedding", chunk.id)));
        }
        if chunk.embedding.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "chunk {} has dimension {}, index dimension is {expected}",
                chunk.id,
                chunk.embedding.len()
            )));
        }
        if chunk.metadata.source.is_empty() || chunk.metadata.category.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "chunk {} is missing source or category",
                chunk.id
            )));
        }
    }
    Ok(expected)
}

pub(crate) fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::InvalidArgument("k must be at least 1".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_ignores_magnitude() {
        let s = similarity(Metric::Cosine, &[1.0, 0.0], &[5.0, 0.0]);
        assert!((s - 1.0).abs() < 1e-6);
        assert_eq!(similarity(Metric::Cosine, &[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn l2_is_one_for_identical_vectors() {
        assert!((similarity(Metric::L2, &[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(similarity(Metric::L2, &[0.0], &[3.0]) < similarity(Metric::L2, &[0.0], &[1.0]));
    }

    #[test]
    fn dot_keeps_magnitude() {
        assert_eq!(similarity(Metric::Dot, &[1.0, 2.0], &[3.0, 4.0]), 11.0);
    }
}
