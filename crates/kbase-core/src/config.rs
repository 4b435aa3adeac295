//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! and `APP_*` env vars (`__` separates nested keys, e.g.
//! `APP_CHUNKING__CHUNK_SIZE=800`). Provides helpers to expand `~` and
//! `${VAR}` and to resolve relative paths against a known base directory.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::loader::DEFAULT_EXTENSIONS;
use crate::types::{IndexBackend, Metric};

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    /// Loads `config.toml` from the working directory plus env overlays.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], but an explicit file replaces `config.toml`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let base = path.map_or_else(|| PathBuf::from("config.toml"), Path::to_path_buf);
        let mut figment =
            Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(&base));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(sibling(&base, "dev"))),
            "prod" | "production" => figment = figment.merge(Toml::file(sibling(&base, "prod"))),
            "test" | "testing" => figment = figment.merge(Toml::file(sibling(&base, "test"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment, env_name })
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    /// Extracts and validates the full typed settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

fn sibling(base: &Path, env: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map_or_else(|| "config".to_string(), |s| s.to_string_lossy().into_owned());
    base.with_file_name(format!("{stem}.{env}.toml"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ingest: IngestSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub search: SearchSettings,
    pub log: LogSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        if self.search.default_k == 0 {
            return Err(Error::Configuration("search.default_k must be at least 1".into()));
        }
        if self.ingest.extensions.is_empty() {
            return Err(Error::Configuration("ingest.extensions must not be empty".into()));
        }
        Ok(())
    }

    pub fn docs_path(&self) -> PathBuf {
        expand_path(&self.ingest.docs_path)
    }

    pub fn persist_dir(&self) -> PathBuf {
        expand_path(&self.index.persist_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub docs_path: String,
    pub extensions: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            docs_path: "app/docs".to_string(),
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunking.chunk_size must be at least 1".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Configuration(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    OpenAi,
    Fake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub endpoint: String,
    /// Name of the env var holding the API key. The key itself never lives in config.
    pub api_key_env: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimension: 1536,
            batch_size: 32,
            max_concurrency: 4,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("embedding.dimension", self.dimension as u64),
            ("embedding.batch_size", self.batch_size as u64),
            ("embedding.max_concurrency", self.max_concurrency as u64),
            ("embedding.timeout_secs", self.timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::Configuration(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: IndexBackend,
    pub persist_dir: String,
    pub metric: Metric,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Lance,
            persist_dir: "app/db/index".to_string(),
            metric: Metric::Cosine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_k: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_k: 5 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// EnvFilter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// Directory for rolling log files; empty disables file logging.
    pub dir: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            dir: "logs".to_string(),
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_keeps_directory() {
        let p = sibling(Path::new("/etc/kbase/kbase.toml"), "prod");
        assert_eq!(p, PathBuf::from("/etc/kbase/kbase.prod.toml"));
    }

    #[test]
    fn expand_path_keeps_relative_paths_relative() {
        assert_eq!(expand_path("app/docs"), PathBuf::from("app/docs"));
        assert!(expand_path("~/docs").is_absolute());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let c = ChunkingSettings {
            chunk_size: 100,
            chunk_overlap: 100,
        };
        assert!(matches!(c.validate(), Err(Error::Configuration(_))));
    }
}
