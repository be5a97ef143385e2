//! Data models for retrieval operations.

use serde::{Deserialize, Serialize};

/// One passage returned by a nearest-neighbour query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The matched chunk content
    pub text: String,
    /// Provenance label ("Unknown" when absent)
    pub source: String,
    /// Squared L2 distance to the query; lower is more similar
    pub distance: f32,
}

/// Statistics about the vector index.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Number of passages held by the index
    pub total_records: usize,
    /// Fixed embedding dimensionality
    pub dimensions: usize,
    /// Index variant name
    pub index_type: String,
}
