#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

use std::sync::Arc;

use tracing::info;

use kbase_core::config::{EmbeddingProviderKind, EmbeddingSettings};
use kbase_core::traits::Embedder;
use kbase_core::Result;

pub mod fake;
pub mod http;

pub use fake::FakeEmbedder;
pub use http::HttpEmbedder;

/// Env switch that forces the deterministic embedder regardless of config.
pub const FAKE_EMBEDDINGS_ENV: &str = "APP_USE_FAKE_EMBEDDINGS";

/// Builds the configured embedder. `APP_USE_FAKE_EMBEDDINGS=1` overrides the provider.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let forced = fake_requested(std::env::var(FAKE_EMBEDDINGS_ENV).ok().as_deref());
    build_embedder(settings, forced)
}

pub fn build_embedder(settings: &EmbeddingSettings, force_fake: bool) -> Result<Arc<dyn Embedder>> {
    if force_fake || settings.provider == EmbeddingProviderKind::Fake {
        info!(dimension = settings.dimension, "using fake embedder");
        return Ok(Arc::new(FakeEmbedder::new(settings.dimension)));
    }
    let embedder = HttpEmbedder::from_settings(settings)?;
    info!(model = %settings.model, endpoint = %settings.endpoint, dimension = settings.dimension, "using http embedder");
    Ok(Arc::new(embedder))
}

pub fn fake_requested(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
