use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use kbase_core::config::{Config, Settings};
use kbase_core::loader::DocumentLoader;
use kbase_core::Error;
use kbase_core::types::{IndexStatus, IngestionReport, SearchRequest, SearchResult};
use kbase_embed::{fake_requested, FAKE_EMBEDDINGS_ENV};
use kbase_service::{KnowledgeBase, StartupOutcome};
use kbase_vector::IndexCatalog;

/// Characters of chunk text shown per hit in the human-readable listing.
const PREVIEW_CHARS: usize = 240;

pub async fn start(settings: Settings) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(settings).await?;
    let outcome = with_spinner("Starting knowledge base", kb.startup()).await?;
    match &outcome {
        StartupOutcome::Loaded { chunks } => println!("✅ Loaded persisted index ({chunks} chunks)"),
        StartupOutcome::Ingested(report) => print_report(report),
        StartupOutcome::Empty { reason } => {
            println!("⚠️  Initial ingestion failed, index is empty: {reason}");
        }
    }
    print_status(&kb.status().await?);
    Ok(())
}

pub async fn ingest(settings: Settings, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let root = dir.unwrap_or_else(|| settings.docs_path());
    let kb = KnowledgeBase::open(settings).await?;
    kb.load().await?;
    let message = format!("Ingesting {}", root.display());
    let report = with_spinner(&message, kb.ingest(&root)).await?;
    print_report(&report);
    Ok(())
}

pub async fn refresh(settings: Settings) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(settings).await?;
    kb.load().await?;
    let message = format!("Refreshing from {}", kb.settings().docs_path().display());
    let report = with_spinner(&message, kb.refresh()).await?;
    print_report(&report);
    Ok(())
}

pub async fn search(
    settings: Settings,
    query: String,
    k: Option<usize>,
    category: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(settings).await?;
    if !kb.load().await? {
        warn!("no persisted index; run `kbase ingest` or `kbase start` first");
    }
    let request = SearchRequest { query, k, category };
    let results = kb.search_request(&request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results(&request.query, &results);
    }
    Ok(())
}

pub async fn status(settings: Settings, json: bool) -> anyhow::Result<()> {
    let kb = KnowledgeBase::open(settings).await?;
    kb.load().await?;
    let status = kb.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

/// Read-only: never embeds, never writes the index.
pub fn doctor(config: &Config, settings: &Settings) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!("Environment: {}", config.env_name());
    println!(
        "{}",
        serde_json::to_string_pretty(settings).context("serializing settings")?
    );
    let forced = fake_requested(std::env::var(FAKE_EMBEDDINGS_ENV).ok().as_deref());
    if forced {
        println!("Embedder: fake (forced by {FAKE_EMBEDDINGS_ENV})");
    } else {
        println!("Embedder: {:?} {} ({} dims)", settings.embedding.provider, settings.embedding.model, settings.embedding.dimension);
    }

    println!("\nDocs root");
    println!("=========");
    let loader = DocumentLoader::new(settings.docs_path()).with_extensions(&settings.ingest.extensions);
    match loader.scan_summary() {
        Ok(summary) => {
            println!("{}", summary.root.display());
            println!("Supported files: {}", summary.supported);
            println!("Unsupported files: {}", summary.unsupported);
            for (category, count) in &summary.by_category {
                println!("  {category}: {count}");
            }
            for (ext, count) in &summary.by_extension {
                println!("  .{ext}: {count}");
            }
        }
        Err(e) => println!("❌ {e}"),
    }

    println!("\nIndex");
    println!("=====");
    let catalog = IndexCatalog::new(settings.persist_dir(), settings.index.backend, settings.index.metric);
    println!("{} ({} / {})", catalog.root().display(), catalog.backend(), catalog.metric());
    match catalog.read_manifest() {
        Ok(Some(manifest)) => {
            println!("Generation: {}", manifest.generation);
            println!("Chunks: {}", manifest.chunk_count);
            if let Some(dimension) = manifest.dimension {
                println!("Dimension: {dimension}");
            }
            println!("Updated: {}", manifest.updated_at.to_rfc3339());
        }
        Ok(None) => println!("No persisted index"),
        Err(e) => println!("❌ {e}"),
    }
    match catalog.generations() {
        Ok(generations) if !generations.is_empty() => println!("On disk: {}", generations.join(", ")),
        Ok(_) => {}
        Err(e) => println!("❌ {e}"),
    }
    Ok(())
}

async fn with_spinner<T, F>(message: &str, work: F) -> anyhow::Result<T>
where
    F: Future<Output = kbase_core::Result<T>>,
{
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    let result = work.await;
    pb.finish_and_clear();
    Ok(result?)
}

fn print_report(report: &IngestionReport) {
    println!("✅ {:?} of {} finished in {} ms", report.mode, report.root.display(), report.elapsed_ms());
    println!("📊 Documents: {}", report.documents);
    println!("📊 Chunks: {}", report.chunks);
    if !report.skipped.is_empty() {
        println!("⏭️  Skipped {} files", report.skipped.len());
        for skipped in &report.skipped {
            println!("   {}", Error::from(skipped.clone()));
        }
    }
    for error in &report.errors {
        println!("❌ Batch {} failed: {}", error.batch, error.message);
        for document in &error.documents {
            println!("   dropped {document}");
        }
    }
}

fn print_status(status: &IndexStatus) {
    println!("Index: {} ({} / {})", status.persist_dir.display(), status.backend, status.metric);
    println!("Chunks: {}", status.chunk_count);
    match status.last_ingested_at {
        Some(at) => println!("Last ingested: {}", at.to_rfc3339()),
        None => println!("Last ingested: never"),
    }
}

fn print_results(query: &str, results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results for \"{query}\"");
        return;
    }
    println!("🔍 {} results for \"{query}\"", results.len());
    for (rank, result) in results.iter().enumerate() {
        let meta = &result.metadata;
        println!(
            "\n{}. {} [{}] chunk {}/{} score {:.4}",
            rank + 1,
            meta.rel_path,
            meta.category,
            meta.chunk_index + 1,
            meta.total_chunks,
            result.score
        );
        let preview: String = result.text.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if result.text.chars().count() > PREVIEW_CHARS { "…" } else { "" };
        println!("   {}{ellipsis}", preview.replace('\n', " "));
    }
}
