//! `groundwork`: build a document index and query it from the command line.

mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use groundwork_retrieval::{
    build_provider, load_manifest, Chunker, EmbeddingIndex, Ingestor, Retriever, SearchResult,
    EMBEDDINGS_FILE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{GroundworkConfig, API_KEY_ENV, DEFAULT_CONFIG_FILE};

const SNIPPET_CHARS: usize = 200;

#[derive(Parser)]
#[command(
    name = "groundwork",
    version,
    about = "Groundwork: semantic retrieval over a document corpus"
)]
struct Cli {
    /// Path to config file [default: groundwork.toml]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a <company>/<category>/<file> tree
    Ingest {
        /// Root of the document tree
        #[arg(short, long)]
        input: PathBuf,
        /// Index directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Add to the existing index instead of replacing it
        #[arg(long)]
        append: bool,
    },
    /// Print the chunks most similar to a query
    Search {
        query: String,
        /// Number of results (overrides config)
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
        /// Index directory (overrides config)
        #[arg(long)]
        index: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the context string a model would be grounded on
    Context {
        query: String,
        /// Number of chunks (overrides config)
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
        /// Index directory (overrides config)
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Summarize a persisted index
    Inspect {
        /// Index directory (overrides config)
        #[arg(long)]
        index: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    dotenvy::dotenv().ok();

    let (config_path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let config = GroundworkConfig::load(&config_path, explicit)
        .await?
        .with_api_key_override(std::env::var(API_KEY_ENV).ok());

    match cli.command {
        Commands::Ingest {
            input,
            output,
            append,
        } => {
            let output = output.unwrap_or_else(|| config.index_dir.clone());
            let embedder = build_provider(&config.embedding)?;
            let chunker = Chunker::from_config(&config.chunking)?;
            let ingestor = Ingestor::new(embedder)
                .with_chunker(chunker)
                .with_config(config.ingest.clone());

            let mut index = if append && output.join(EMBEDDINGS_FILE).exists() {
                let existing = load_index(&output).await?;
                info!(rows = existing.len(), "Appending to existing index");
                existing
            } else {
                EmbeddingIndex::new()
            };

            let report = ingestor
                .ingest_into(&input, &mut index)
                .await
                .with_context(|| format!("Failed to ingest '{}'", input.display()))?;
            index.persist(&output).await.with_context(|| {
                format!("Failed to write index to '{}'", output.display())
            })?;

            println!(
                "Indexed {} chunk(s) from {} of {} document(s) ({} skipped, {} chunk(s) rejected)",
                report.chunks_indexed,
                report.documents_indexed,
                report.documents_found,
                report.documents_skipped,
                report.chunks_rejected
            );
            println!("Index: {} ({} rows)", output.display(), index.len());
        }
        Commands::Search {
            query,
            top_k,
            index,
            json,
        } => {
            let retriever = open_retriever(&config, index.as_deref()).await?;
            let k = top_k.unwrap_or(retriever.top_k());
            let results = retriever.retrieve(&query, k).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (rank, result) in results.iter().enumerate() {
                    print_result(rank + 1, result);
                }
            }
        }
        Commands::Context {
            query,
            top_k,
            index,
        } => {
            let retriever = open_retriever(&config, index.as_deref()).await?;
            let k = top_k.unwrap_or(retriever.top_k());
            println!("{}", retriever.get_relevant_context(&query, k).await?);
        }
        Commands::Inspect { index } => {
            let dir = index.unwrap_or_else(|| config.index_dir.clone());
            let loaded = load_index(&dir).await?;
            let manifest = load_manifest(&dir).await?;

            println!("Index: {}", dir.display());
            println!("Rows: {}", loaded.len());
            match loaded.dimension() {
                Some(dimension) => println!("Dimension: {dimension}"),
                None => println!("Dimension: (empty index)"),
            }
            match manifest {
                Some(manifest) => println!("Created: {}", manifest.created_at.to_rfc3339()),
                None => println!("Created: unknown (no manifest)"),
            }
            let counts = loaded.category_counts();
            if !counts.is_empty() {
                println!("\nChunks per category:");
                for ((company, category), count) in &counts {
                    println!("  {company} / {category}: {count}");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn load_index(dir: &Path) -> anyhow::Result<EmbeddingIndex> {
    EmbeddingIndex::load(dir)
        .await
        .with_context(|| format!("Failed to load index from '{}'", dir.display()))
}

async fn open_retriever(
    config: &GroundworkConfig,
    index_dir: Option<&Path>,
) -> anyhow::Result<Retriever> {
    let dir = index_dir.unwrap_or(config.index_dir.as_path());
    let index = load_index(dir).await?;
    let embedder = build_provider(&config.embedding)?;
    let retriever = Retriever::new(embedder, index)
        .context("Index was built with a different embedding dimension")?
        .with_config(&config.retrieval);
    Ok(retriever)
}

fn print_result(rank: usize, result: &SearchResult) {
    println!(
        "{rank}. [{:.4}] {} / {} / {} #{}",
        result.similarity, result.company, result.category, result.source_file, result.chunk_index
    );
    println!("   {}", snippet(&result.text, SNIPPET_CHARS));
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
