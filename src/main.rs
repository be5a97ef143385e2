use std::sync::Arc;

use anyhow::Context;

use testwise_rag::chat::ChatPipeline;
use testwise_rag::config::Config;
use testwise_rag::llm::{OpenAiEmbeddings, OpenAiGeneration};
use testwise_rag::rag::{LoadOutcome, VectorIndex};
use testwise_rag::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load().context("failed to load configuration")?;
    let api_key = config.require_api_key()?.to_string();

    let (index, outcome) = VectorIndex::open(config.index_base_path(), config.embedding_dimensions);
    match &outcome {
        LoadOutcome::Loaded { records } => {
            log::info!("loaded vector index with {} passages", records)
        }
        LoadOutcome::Fresh => log::info!("created new vector index"),
        LoadOutcome::Recovered { reason } => log::warn!("reset vector index: {}", reason),
    }
    let index = Arc::new(index);

    let embeddings = Arc::new(OpenAiEmbeddings::new(
        api_key.clone(),
        config.embedding_model.clone(),
        config.api_base_url.clone(),
        config.embedding_dimensions,
    )?);
    let generation = Arc::new(OpenAiGeneration::new(
        api_key,
        config.generation_model.clone(),
        config.api_base_url.clone(),
    )?);

    let pipeline =
        ChatPipeline::new(embeddings, Arc::clone(&index), generation).with_top_k(config.top_k);

    let state = Arc::new(AppState { pipeline, index });
    server::serve(state, config.port).await?;

    Ok(())
}
