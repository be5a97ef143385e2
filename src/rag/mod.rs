//! Retrieval core: text chunking, vector index, shared models.

mod chunker;
mod index;
mod models;

pub use chunker::{split, split_documents, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
pub use index::{IndexError, LoadOutcome, VectorIndex};
pub use models::{IndexStats, RetrievalResult};
