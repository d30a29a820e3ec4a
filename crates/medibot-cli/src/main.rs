//! CLI entry point for the medibot ingestion pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use medibot_core::{
    app_data_dir, default_config_path, discover_documents, load_config, prepare_document,
    save_config, AnyLoader, Checkpoint, Config, Credentials, InMemoryStore, IngestOptions,
    Ingestor, OllamaEmbedder, PineconeStore, TextSplitter, VectorStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "medibot")]
#[command(about = "medibot: load medical reference documents into a vector index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Load, chunk, embed and upsert documents (files or directories) into the index.
    Ingest {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
        /// Config file to use instead of the one in the app data directory.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Skip documents a previous run already stored.
        #[arg(long)]
        resume: bool,
        /// Embed into an in-memory index instead of Pinecone.
        #[arg(long)]
        dry_run: bool,
        /// Assume the index exists; do not check or create it.
        #[arg(long)]
        skip_provision: bool,
    },
    /// Create the index if it does not exist yet.
    Provision {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Load and chunk documents locally and print the chunks. No remote calls.
    Chunk {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Print chunks as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show where medibot stores its config and checkpoint (app data directory).
    DataDir,
    /// Write a config file with the default settings.
    InitConfig {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `chunk --json` output stays clean.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medibot=info,medibot_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            paths,
            config,
            resume,
            dry_run,
            skip_provision,
        } => ingest(&paths, config.as_deref(), resume, dry_run, skip_provision).await,
        Commands::Provision { config } => {
            let config = load_config(config.as_deref())?;
            let ingestor = build_ingestor(&config, Arc::new(pinecone_store(&config)?))?;
            ingestor.provision().await?;
            println!("Index \"{}\" is ready", config.index.name);
            Ok(())
        }
        Commands::Chunk { path, config, json } => chunk(&path, config.as_deref(), json),
        Commands::DataDir => {
            match app_data_dir() {
                Some(p) => println!("{}", p.display()),
                None => eprintln!("Could not determine app data directory."),
            }
            Ok(())
        }
        Commands::InitConfig { force } => {
            let path = default_config_path().context("could not determine app data directory")?;
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let written = save_config(&Config::default(), Some(&path))?;
            println!("Wrote default config to {}", written.display());
            Ok(())
        }
    }
}

async fn ingest(
    paths: &[PathBuf],
    config_path: Option<&Path>,
    resume: bool,
    dry_run: bool,
    skip_provision: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store: Arc<dyn VectorStore> = if dry_run {
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(pinecone_store(&config)?)
    };
    let ingestor = build_ingestor(&config, store)?;

    // The in-memory index starts empty, so a dry run always provisions.
    if dry_run || !skip_provision {
        ingestor.provision().await?;
    }

    let report = if dry_run {
        ingestor.ingest(paths, None).await?
    } else {
        let mut checkpoint = Checkpoint::open_default(&config.index.name)?;
        if !resume {
            checkpoint.reset()?;
        }
        tracing::info!(path = %checkpoint.path().display(), "recording progress");
        ingestor.ingest(paths, Some(&mut checkpoint)).await?
    };

    println!(
        "Ingested {} document(s): {} page(s), {} chunk(s), {} vector(s) upserted into \"{}\"",
        report.documents, report.pages, report.chunks, report.upserted, config.index.name
    );
    if report.deleted > 0 {
        println!("Removed {} stale vector(s) from shorter documents", report.deleted);
    }
    if report.skipped > 0 {
        println!("Skipped {} document(s) already stored", report.skipped);
    }
    if dry_run {
        println!("Dry run: nothing was sent to Pinecone");
    } else {
        println!("Data stored in Pinecone successfully");
    }
    Ok(())
}

fn chunk(path: &Path, config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let loader = AnyLoader::with_max_file_size(config.loader.max_file_size);
    let splitter = TextSplitter::new(config.chunking.splitter_config())?;

    let mut chunks = Vec::new();
    let mut pages = 0;
    for doc in discover_documents(path, &loader)? {
        let prepared = prepare_document(&loader, &splitter, &doc)
            .with_context(|| format!("failed to prepare {}", doc.display()))?;
        pages += prepared.pages;
        chunks.extend(prepared.chunks);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }
    println!("{} page(s), {} chunk(s) under {}", pages, chunks.len(), path.display());
    for c in &chunks {
        let first = c.content.lines().next().unwrap_or("").trim();
        let preview: String = first.chars().take(60).collect();
        let ellipsis = if first.chars().count() > 60 { "..." } else { "" };
        println!(
            "  {}#{} @{} ({} chars)  {}{}",
            c.source.as_deref().unwrap_or("-"),
            c.index,
            c.start,
            c.content.chars().count(),
            preview,
            ellipsis
        );
    }
    Ok(())
}

fn pinecone_store(config: &Config) -> anyhow::Result<PineconeStore> {
    let credentials = Credentials::from_env()?;
    Ok(PineconeStore::new(credentials.pinecone_api_key)
        .with_control_url(config.index.control_url.as_str())
        .with_namespace(config.index.namespace.as_str())
        .with_ready_timeout(Duration::from_secs(config.index.ready_timeout_secs)))
}

fn build_ingestor(config: &Config, store: Arc<dyn VectorStore>) -> anyhow::Result<Ingestor> {
    let embedder = OllamaEmbedder::from_url(&config.embedding.base_url)?
        .with_model(config.embedding.model.as_str())
        .with_dimension(config.embedding.dimension);
    tracing::info!(
        model = %config.embedding.model,
        index = %config.index.name,
        store = store.name(),
        "pipeline configured"
    );
    let ingestor = Ingestor::new(
        Arc::new(AnyLoader::with_max_file_size(config.loader.max_file_size)),
        TextSplitter::new(config.chunking.splitter_config())?,
        Arc::new(embedder),
        store,
        config.index.spec(config.embedding.dimension),
        IngestOptions::from_config(config),
    )?;
    Ok(ingestor)
}
