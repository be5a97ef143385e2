//! Clients for the external embedding and generation collaborators.

mod embeddings;
mod generation;

pub use embeddings::{EmbeddingProvider, OpenAiEmbeddings, DEFAULT_EMBEDDING_MODEL};
pub use generation::{GenerationProvider, OpenAiGeneration, DEFAULT_GENERATION_MODEL};

use thiserror::Error;

/// Default dimensionality of [`DEFAULT_EMBEDDING_MODEL`] vectors.
pub const DEFAULT_DIMENSIONS: usize = 1536;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service error: {status} - {message}")]
    Service { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}
