use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use twox_hash::XxHash64;

use kbase_core::traits::Embedder;
use kbase_core::Result;

/// Deterministic bag-of-words embedder for tests and offline runs.
///
/// Each lowercased alphanumeric token is hashed into one of `dimension`
/// buckets and the vector is L2-normalized, so texts sharing words score
/// higher under cosine similarity. Text with no tokens maps to the zero vector.
#[derive(Debug, Clone)]
pub struct FakeEmbedder {
    dimension: usize,
    model_id: String,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("fake-xxh64-{dimension}"),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        if self.dimension == 0 {
            return v;
        }
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = usize::try_from(h % self.dimension as u64).unwrap_or(0);
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
