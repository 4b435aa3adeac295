use std::sync::Arc;

use tokio::sync::RwLock;

use kbase_core::traits::VectorStore;

/// Shared pointer to the live index.
///
/// Readers clone the inner `Arc` and search without holding the lock. A
/// search that started before a swap finishes against the old index.
#[derive(Clone)]
pub struct IndexHandle {
    live: Arc<RwLock<Arc<dyn VectorStore>>>,
}

impl IndexHandle {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            live: Arc::new(RwLock::new(store)),
        }
    }

    pub async fn current(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&*self.live.read().await)
    }

    /// Makes `store` live and returns the one it replaced.
    pub async fn replace(&self, store: Arc<dyn VectorStore>) -> Arc<dyn VectorStore> {
        std::mem::replace(&mut *self.live.write().await, store)
    }
}
