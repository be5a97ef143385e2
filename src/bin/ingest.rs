//! Knowledge-base ingestion CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use testwise_rag::config::Config;
use testwise_rag::ingest;
use testwise_rag::llm::OpenAiEmbeddings;
use testwise_rag::rag::{LoadOutcome, VectorIndex, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};

#[derive(Parser)]
#[command(
    name = "testwise-ingest",
    about = "Ingest a knowledge base into the vector index",
    version
)]
struct Cli {
    /// Knowledge base directory
    #[arg(long, default_value = "kb")]
    dir: PathBuf,

    /// Override the data directory holding the index artifacts
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Overlap characters between adjacent chunks
    #[arg(long, default_value_t = DEFAULT_OVERLAP)]
    overlap: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let api_key = config.require_api_key()?.to_string();

    let (index, outcome) = VectorIndex::open(config.index_base_path(), config.embedding_dimensions);
    match &outcome {
        LoadOutcome::Loaded { records } => {
            log::info!("appending to existing index with {} passages", records)
        }
        LoadOutcome::Fresh => log::info!("created new vector index"),
        LoadOutcome::Recovered { reason } => log::warn!("reset vector index: {}", reason),
    }

    let embeddings = Arc::new(OpenAiEmbeddings::new(
        api_key,
        config.embedding_model.clone(),
        config.api_base_url.clone(),
        config.embedding_dimensions,
    )?);

    let report = ingest::run(
        &cli.dir,
        &index,
        embeddings,
        &config.manifest_path(),
        cli.chunk_size,
        cli.overlap,
    )
    .await?;

    println!(
        "Ingested {} chunks from {} files ({} skipped). Manifest: {}",
        report.chunks_indexed,
        report.files_processed,
        report.files_skipped,
        config.manifest_path().display()
    );

    Ok(())
}
