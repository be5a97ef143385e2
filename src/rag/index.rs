//! Brute-force vector index with paired flat-file persistence.
//!
//! Embeddings live in a row-major f32 blob (`<base>.vec`) with an
//! ordered metadata document (`<base>.json`) beside it; record positions
//! are the join key between the two. The index is append-only: there is
//! no update or delete, corrections require re-ingesting the corpus.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{IndexStats, RetrievalResult};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vector count ({vectors}) doesn't match text count ({texts})")]
    LengthMismatch { vectors: usize, texts: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// How the on-disk index state was resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Both artifacts were present and consistent.
    Loaded { records: usize },
    /// No artifacts existed yet; starting empty.
    Fresh,
    /// Artifacts were unreadable or inconsistent; starting empty.
    Recovered { reason: String },
}

/// Per-passage metadata persisted alongside the vector blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PassageMeta {
    text: String,
    source: String,
}

#[derive(Default)]
struct IndexState {
    /// All embeddings, row-major.
    vectors: Vec<f32>,
    /// Metadata in insertion order; grows in lockstep with `vectors`.
    metadata: Vec<PassageMeta>,
}

/// Exact k-nearest-neighbour index over squared L2 distance.
///
/// Appends serialize through the write lock and publish vectors and
/// metadata in one critical section, so concurrent searches observe
/// either none or all of a batch, never a torn state.
pub struct VectorIndex {
    state: RwLock<IndexState>,
    dimensions: usize,
    base_path: PathBuf,
}

impl VectorIndex {
    /// Open the index at `base_path`, loading the persisted artifact
    /// pair when present.
    ///
    /// Never fails: missing artifacts start an empty index, and an
    /// unreadable or inconsistent pair is discarded (with a warning) in
    /// favour of an empty one, so startup is not blocked on corrupt
    /// retrieval state. The outcome tag tells the caller which case
    /// applied.
    pub fn open(base_path: impl Into<PathBuf>, dimensions: usize) -> (Self, LoadOutcome) {
        let base_path = base_path.into();

        let (state, outcome) = match Self::load_pair(&base_path, dimensions) {
            Ok(Some(state)) => {
                let records = state.metadata.len();
                (state, LoadOutcome::Loaded { records })
            }
            Ok(None) => (IndexState::default(), LoadOutcome::Fresh),
            Err(reason) => {
                log::warn!(
                    "discarding vector index at {}: {}",
                    base_path.display(),
                    reason
                );
                (IndexState::default(), LoadOutcome::Recovered { reason })
            }
        };

        (
            Self {
                state: RwLock::new(state),
                dimensions,
                base_path,
            },
            outcome,
        )
    }

    /// Append a batch of passages.
    ///
    /// The batch is validated up front and rejected whole on a length or
    /// dimensionality mismatch. `sources` defaults to synthetic
    /// `"Document {i+1}"` labels when omitted and pads with `"Unknown"`
    /// when shorter than `texts`. Persistence runs synchronously after
    /// the append; a save failure is logged and the in-memory state is
    /// kept, so the on-disk copy may trail memory until the next
    /// successful save.
    pub fn add(
        &self,
        vectors: Vec<Vec<f32>>,
        texts: Vec<String>,
        sources: Option<Vec<String>>,
    ) -> Result<usize> {
        if vectors.len() != texts.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                texts: texts.len(),
            });
        }
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
        }
        if vectors.is_empty() {
            return Ok(0);
        }

        let sources = sources.unwrap_or_default();
        let labelled = !sources.is_empty();
        let added = texts.len();

        let mut state = self.state.write().expect("vector index lock poisoned");
        for (i, (vector, text)) in vectors.into_iter().zip(texts.into_iter()).enumerate() {
            let source = if labelled {
                sources.get(i).cloned().unwrap_or_else(|| "Unknown".to_string())
            } else {
                format!("Document {}", i + 1)
            };
            state.vectors.extend_from_slice(&vector);
            state.metadata.push(PassageMeta { text, source });
        }

        if let Err(e) = self.save(&state) {
            log::warn!("failed to persist vector index: {}", e);
        }

        Ok(added)
    }

    /// Brute-force nearest-neighbour search.
    ///
    /// Returns up to `k` results ascending by squared L2 distance; ties
    /// keep insertion order. An empty index yields an empty Vec, not an
    /// error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let state = self.state.read().expect("vector index lock poisoned");
        if state.metadata.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = state
            .vectors
            .chunks_exact(self.dimensions)
            .map(|row| squared_l2(query, row))
            .enumerate()
            .map(|(i, distance)| (distance, i))
            .collect();

        // Stable sort keeps earlier-inserted records first on ties.
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k.min(state.metadata.len()))
            .map(|(distance, i)| RetrievalResult {
                text: state.metadata[i].text.clone(),
                source: state.metadata[i].source.clone(),
                distance,
            })
            .collect())
    }

    /// Read-only diagnostics.
    pub fn stats(&self) -> IndexStats {
        let state = self.state.read().expect("vector index lock poisoned");
        IndexStats {
            total_records: state.metadata.len(),
            dimensions: self.dimensions,
            index_type: "FlatL2".to_string(),
        }
    }

    /// Fixed embedding dimensionality declared at creation.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vectors_path(base: &Path) -> PathBuf {
        base.with_extension("vec")
    }

    fn metadata_path(base: &Path) -> PathBuf {
        base.with_extension("json")
    }

    /// Write both artifacts. Called while the write lock is held so two
    /// concurrent appends cannot land their snapshots out of order.
    fn save(&self, state: &IndexState) -> Result<()> {
        if let Some(parent) = self.base_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let blob: Vec<u8> = state.vectors.iter().flat_map(|f| f.to_le_bytes()).collect();
        fs::write(Self::vectors_path(&self.base_path), blob)?;

        let json = serde_json::to_string_pretty(&state.metadata)?;
        fs::write(Self::metadata_path(&self.base_path), json)?;

        Ok(())
    }

    /// Load the artifact pair. `Ok(None)` means a cold start (neither
    /// artifact exists); `Err` carries the reason the pair is unusable.
    fn load_pair(
        base: &Path,
        dimensions: usize,
    ) -> std::result::Result<Option<IndexState>, String> {
        let vec_path = Self::vectors_path(base);
        let meta_path = Self::metadata_path(base);

        match (vec_path.exists(), meta_path.exists()) {
            (false, false) => return Ok(None),
            (true, true) => {}
            (vec_exists, _) => {
                let missing = if vec_exists { &meta_path } else { &vec_path };
                return Err(format!("missing sibling artifact {}", missing.display()));
            }
        }

        let blob =
            fs::read(&vec_path).map_err(|e| format!("unreadable {}: {}", vec_path.display(), e))?;
        let row_bytes = dimensions * std::mem::size_of::<f32>();
        if row_bytes == 0 || blob.len() % row_bytes != 0 {
            return Err(format!(
                "vector blob length {} is not a multiple of the {}-byte row width",
                blob.len(),
                row_bytes
            ));
        }

        let json = fs::read_to_string(&meta_path)
            .map_err(|e| format!("unreadable {}: {}", meta_path.display(), e))?;
        let metadata: Vec<PassageMeta> =
            serde_json::from_str(&json).map_err(|e| format!("invalid metadata document: {}", e))?;

        let records = blob.len() / row_bytes;
        if records != metadata.len() {
            return Err(format!(
                "vector blob holds {} records but metadata lists {}",
                records,
                metadata.len()
            ));
        }

        let vectors = blob
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Some(IndexState { vectors, metadata }))
    }
}

/// Squared Euclidean distance between two vectors of equal length.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
