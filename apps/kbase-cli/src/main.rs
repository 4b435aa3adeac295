#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use kbase_core::config::Config;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "kbase")]
#[command(about = "Local document knowledge base: ingest, refresh and search", version)]
struct Cli {
    /// Config file replacing ./config.toml (env overlays still apply)
    #[arg(long, global = true, env = "KBASE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the persisted index, or ingest the docs root when there is none
    Start,
    /// Append a directory to the index
    Ingest {
        /// Defaults to `ingest.docs_path`
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
    /// Rebuild the index from the docs root and swap it in
    Refresh,
    /// Top-k chunks for a query
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Index size, metric and last ingestion time
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print resolved settings, docs scan and persisted manifest
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(cli.config.as_deref())?;
    let settings = config.settings()?;
    let _log_guards = logging::init(&settings.log);

    match cli.command {
        Commands::Start => commands::start(settings).await,
        Commands::Ingest { dir } => commands::ingest(settings, dir).await,
        Commands::Refresh => commands::refresh(settings).await,
        Commands::Search {
            query,
            k,
            category,
            json,
        } => commands::search(settings, query, k, category, json).await,
        Commands::Status { json } => commands::status(settings, json).await,
        Commands::Doctor => commands::doctor(&config, &settings),
    }
}
