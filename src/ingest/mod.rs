//! Corpus ingestion: walk a knowledge-base directory, chunk and embed
//! each document, and append the chunks to the vector index.

mod extract;

pub use extract::{extract_text, html_to_text, markdown_to_text, SUPPORTED_EXTENSIONS};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::llm::{EmbeddingProvider, LlmError};
use crate::rag::{split, IndexError, VectorIndex};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Corpus directory not found: {}", .0.display())]
    CorpusNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding service error: {0}")]
    Embedding(#[from] LlmError),

    #[error("Vector index error: {0}")]
    Index(#[from] IndexError),
}

/// Manifest entry recorded per indexed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub tool: String,
    pub title: String,
    pub source_file: String,
}

/// Manifest document written after a full ingestion run.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub chunks: usize,
    pub entries: Vec<ManifestEntry>,
}

/// Summary of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: usize,
}

/// Classify which tool a file documents from its path.
pub fn detect_tool(path: &Path) -> &'static str {
    let path = path.to_string_lossy().to_lowercase();
    if path.contains("selenium") {
        "Selenium"
    } else if path.contains("playwright") {
        "Playwright"
    } else if path.contains("testim") {
        "Testim"
    } else if path.contains("mabl") {
        "Mabl"
    } else if path.contains("testwise") {
        "TestWise"
    } else {
        "Unknown"
    }
}

/// Walk `corpus_dir`, extract and chunk every supported file, embed one
/// batch per file, and append the chunks to the index. A file that
/// fails is logged and skipped; the run continues. The manifest is
/// written once at the end.
pub async fn run(
    corpus_dir: &Path,
    index: &VectorIndex,
    embeddings: Arc<dyn EmbeddingProvider>,
    manifest_path: &Path,
    chunk_size: usize,
    overlap: usize,
) -> Result<IngestReport, IngestError> {
    if !corpus_dir.is_dir() {
        return Err(IngestError::CorpusNotFound(corpus_dir.to_path_buf()));
    }

    let mut report = IngestReport::default();
    let mut entries = Vec::new();

    for entry in WalkDir::new(corpus_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_supported(path) {
            continue;
        }

        match ingest_file(path, index, embeddings.as_ref(), chunk_size, overlap).await {
            Ok(file_entries) => {
                report.files_processed += 1;
                report.chunks_indexed += file_entries.len();
                entries.extend(file_entries);
            }
            Err(e) => {
                log::warn!("skipping {}: {}", path.display(), e);
                report.files_skipped += 1;
            }
        }
    }

    let manifest = Manifest {
        generated_at: Utc::now(),
        chunks: entries.len(),
        entries,
    };
    if let Some(parent) = manifest_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    log::info!(
        "ingestion complete: {} chunks from {} files ({} skipped)",
        report.chunks_indexed,
        report.files_processed,
        report.files_skipped
    );

    Ok(report)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

async fn ingest_file(
    path: &Path,
    index: &VectorIndex,
    embeddings: &dyn EmbeddingProvider,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ManifestEntry>, IngestError> {
    let text = extract::extract_text(path)?;
    let chunks = split(&text, chunk_size, overlap);
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    log::info!("embedding {} chunks from {}", chunks.len(), path.display());
    let vectors = embeddings.embed_batch(&chunks).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let stem = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let tool = detect_tool(path);

    let entries: Vec<ManifestEntry> = (0..chunks.len())
        .map(|i| ManifestEntry {
            id: format!("{}_{:03}", stem, i),
            tool: tool.to_string(),
            title: file_name.clone(),
            source_file: path.display().to_string(),
        })
        .collect();

    let sources = vec![file_name; chunks.len()];
    index.add(vectors, chunks, Some(sources))?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    #[test]
    fn tool_is_detected_from_the_path() {
        assert_eq!(detect_tool(Path::new("kb/selenium/guide.md")), "Selenium");
        assert_eq!(detect_tool(Path::new("kb/Playwright-intro.html")), "Playwright");
        assert_eq!(detect_tool(Path::new("kb/testim_faq.txt")), "Testim");
        assert_eq!(detect_tool(Path::new("kb/mabl/setup.md")), "Mabl");
        assert_eq!(detect_tool(Path::new("kb/misc/notes.md")), "Unknown");
    }

    #[test]
    fn only_supported_extensions_are_picked_up() {
        assert!(is_supported(Path::new("a.md")));
        assert!(is_supported(Path::new("a.HTML")));
        assert!(is_supported(Path::new("a.txt")));
        assert!(!is_supported(Path::new("a.pdf")));
        assert!(!is_supported(Path::new("Makefile")));
    }

    struct FixedEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![0.0, 0.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok((0..texts.len()).map(|i| vec![i as f32, 0.0, 0.0]).collect())
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn ingestion_populates_the_index_and_writes_a_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kb = dir.path().join("kb");
        fs::create_dir_all(&kb).unwrap();
        fs::write(
            kb.join("selenium_guide.md"),
            "# Selenium\n\nSelenium automates browsers across platforms.\n",
        )
        .unwrap();
        fs::write(kb.join("ignored.pdf"), "binary").unwrap();

        let (index, _) = VectorIndex::open(dir.path().join("data/vector_store"), 3);
        let manifest_path = dir.path().join("data/kb_manifest.json");

        let report = run(
            &kb,
            &index,
            Arc::new(FixedEmbeddings),
            &manifest_path,
            1000,
            200,
        )
        .await
        .unwrap();

        assert_eq!(report.files_processed, 1);
        assert_eq!(report.files_skipped, 0);
        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(index.stats().total_records, 1);

        let manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.chunks, 1);
        assert_eq!(manifest.entries[0].id, "selenium_guide_000");
        assert_eq!(manifest.entries[0].tool, "Selenium");
        assert_eq!(manifest.entries[0].title, "selenium_guide.md");

        let results = index.search(&[0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].source, "selenium_guide.md");
    }

    #[tokio::test]
    async fn missing_corpus_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (index, _) = VectorIndex::open(dir.path().join("vector_store"), 3);

        let err = run(
            &dir.path().join("nope"),
            &index,
            Arc::new(FixedEmbeddings),
            &dir.path().join("manifest.json"),
            1000,
            200,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::CorpusNotFound(_)));
    }
}
