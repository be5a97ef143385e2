//! The answer pipeline: embed, search, compose, prompt, generate.
//!
//! Strictly sequential per request; the embedding and generation stages
//! are the only suspension points and each runs under its own budget.
//! The pipeline never writes to the index, so a timed-out stage cannot
//! corrupt persisted state.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;

use crate::llm::{EmbeddingProvider, GenerationProvider, LlmError};
use crate::rag::{IndexError, RetrievalResult, VectorIndex};

use super::floor_char_boundary;
use super::prompt;

/// Budget for the embedding stage.
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for the generation stage.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Passages retrieved per question by default; kept low for latency.
pub const DEFAULT_TOP_K: usize = 2;

/// Total characters of retrieved text composed into the context.
const MAX_CONTEXT_CHARS: usize = 1000;

/// Smallest truncated remainder still worth including.
const MIN_USEFUL_CHARS: usize = 100;

/// Marker appended to a truncated context chunk.
const TRUNCATION_MARKER: &str = "...";

const GENERATION_TEMPERATURE: f32 = 0.7;
const GENERATION_MAX_TOKENS: u32 = 300;

/// One prior turn of the conversation. Owned by the caller; the
/// pipeline reads it and never persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Successful pipeline outcome.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub answer: String,
    /// Source labels of the retrieved passages, nearest first;
    /// duplicates allowed.
    pub sources: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Embedding generation timed out")]
    EmbedTimeout,

    #[error("Answer generation timed out")]
    GenerateTimeout,

    #[error("Embedding service error: {0}")]
    Embedding(#[source] LlmError),

    #[error("Generation service error: {0}")]
    Generation(#[source] LlmError),

    #[error("Vector index error: {0}")]
    Index(#[from] IndexError),
}

impl ChatError {
    /// Stage timeouts are surfaced distinctly so callers can tell "try
    /// again later" from a generic failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChatError::EmbedTimeout | ChatError::GenerateTimeout)
    }
}

/// Orchestrates one question through the five stages. Collaborators are
/// injected at construction; there is no hidden process-wide state.
pub struct ChatPipeline {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    generation: Arc<dyn GenerationProvider>,
    top_k: usize,
}

impl ChatPipeline {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        generation: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            embeddings,
            index,
            generation,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override how many passages are retrieved per question.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Answer a question against the indexed corpus.
    ///
    /// Failures are stage-tagged and never retried here; retry policy
    /// belongs to the caller.
    pub async fn answer(
        &self,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<ChatAnswer, ChatError> {
        let (results, prompt) = self.retrieve(question, history).await?;

        let generated = timeout(
            GENERATE_TIMEOUT,
            self.generation
                .generate(&prompt, GENERATION_TEMPERATURE, GENERATION_MAX_TOKENS),
        )
        .await;
        let answer = match generated {
            Err(_) => return Err(ChatError::GenerateTimeout),
            Ok(Err(e)) => return Err(ChatError::Generation(e)),
            Ok(Ok(text)) => text,
        };

        Ok(ChatAnswer {
            answer,
            sources: sources_of(&results),
        })
    }

    /// Streaming variant: same retrieval stages, then incremental
    /// generation. The sources are known before the first fragment.
    pub async fn answer_stream(
        &self,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<(Vec<String>, BoxStream<'static, Result<String, ChatError>>), ChatError> {
        let (results, prompt) = self.retrieve(question, history).await?;
        let sources = sources_of(&results);

        let fragments = self
            .generation
            .generate_stream(&prompt, GENERATION_TEMPERATURE, GENERATION_MAX_TOKENS)
            .map(|item| item.map_err(ChatError::Generation))
            .boxed();

        Ok((sources, fragments))
    }

    /// Stages 1-4, shared by the plain and streaming paths.
    async fn retrieve(
        &self,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<(Vec<RetrievalResult>, String), ChatError> {
        let embedded = timeout(EMBED_TIMEOUT, self.embeddings.embed(question)).await;
        let embedding = match embedded {
            Err(_) => return Err(ChatError::EmbedTimeout),
            Ok(Err(e)) => return Err(ChatError::Embedding(e)),
            Ok(Ok(vector)) => vector,
        };

        let results = self.index.search(&embedding, self.top_k)?;
        let context = compose_context(&results);
        let prompt = prompt::build_prompt(question, &context, history);

        Ok((results, prompt))
    }
}

fn sources_of(results: &[RetrievalResult]) -> Vec<String> {
    results.iter().map(|r| r.source.clone()).collect()
}

/// Concatenate retrieved texts, nearest first, under the context budget.
///
/// A chunk that would overflow the budget is truncated to the remaining
/// allowance and marked, but only when the allowance is still useful;
/// every later chunk is dropped rather than interleaved.
fn compose_context(results: &[RetrievalResult]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;

    for result in results {
        let text = result.text.as_str();
        if total + text.len() > MAX_CONTEXT_CHARS {
            let remaining = MAX_CONTEXT_CHARS - total;
            if remaining > MIN_USEFUL_CHARS {
                let cut = floor_char_boundary(text, remaining);
                parts.push(format!("{}{}", &text[..cut], TRUNCATION_MARKER));
            }
            break;
        }
        parts.push(text.to_string());
        total += text.len();
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use futures_util::stream;

    use super::*;

    fn result(text: &str, source: &str, distance: f32) -> RetrievalResult {
        RetrievalResult {
            text: text.to_string(),
            source: source.to_string(),
            distance,
        }
    }

    #[test]
    fn compose_keeps_whole_chunks_under_budget() {
        let results = vec![result(&"a".repeat(400), "a", 0.0), result(&"b".repeat(500), "b", 1.0)];
        let context = compose_context(&results);
        assert_eq!(context, format!("{}\n\n{}", "a".repeat(400), "b".repeat(500)));
    }

    #[test]
    fn compose_truncates_the_overflowing_chunk_with_a_marker() {
        let results = vec![result(&"a".repeat(600), "a", 0.0), result(&"b".repeat(600), "b", 1.0)];
        let context = compose_context(&results);

        let parts: Vec<&str> = context.split("\n\n").collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], format!("{}...", "b".repeat(400)));
    }

    #[test]
    fn compose_drops_a_chunk_when_the_allowance_is_too_small() {
        let results = vec![result(&"a".repeat(950), "a", 0.0), result(&"b".repeat(600), "b", 1.0)];
        let context = compose_context(&results);
        assert_eq!(context, "a".repeat(950));
    }

    #[test]
    fn compose_drops_later_chunks_entirely_after_the_budget() {
        let results = vec![
            result(&"a".repeat(600), "a", 0.0),
            result(&"b".repeat(600), "b", 1.0),
            result(&"c".repeat(50), "c", 2.0),
        ];
        let context = compose_context(&results);
        assert!(!context.contains('c'));
    }

    #[test]
    fn compose_never_exceeds_the_budget() {
        let results = vec![result(&"a".repeat(700), "a", 0.0), result(&"b".repeat(700), "b", 1.0)];
        let context = compose_context(&results);

        let content: usize = context
            .split("\n\n")
            .map(|part| part.trim_end_matches(TRUNCATION_MARKER).len())
            .sum();
        assert!(content <= MAX_CONTEXT_CHARS);
    }

    struct StubEmbeddings {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(LlmError::Service {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            let mut vectors = Vec::new();
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    struct StubGeneration {
        called: AtomicBool,
        delay: Duration,
    }

    impl StubGeneration {
        fn instant() -> Self {
            Self {
                called: AtomicBool::new(false),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for StubGeneration {
        async fn generate(
            &self,
            _prompt: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            self.called.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok("generated answer".to_string())
        }

        fn generate_stream(
            &self,
            _prompt: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> BoxStream<'static, Result<String, LlmError>> {
            self.called.store(true, Ordering::SeqCst);
            stream::iter(vec![Ok("generated ".to_string()), Ok("answer".to_string())]).boxed()
        }
    }

    fn pipeline_with(
        embeddings: StubEmbeddings,
        generation: Arc<StubGeneration>,
    ) -> (ChatPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let (index, _) = VectorIndex::open(dir.path().join("vector_store"), 2);
        index
            .add(
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                vec!["near passage".to_string(), "far passage".to_string()],
                Some(vec!["near.md".to_string(), "far.md".to_string()]),
            )
            .unwrap();

        let pipeline = ChatPipeline::new(Arc::new(embeddings), Arc::new(index), generation);
        (pipeline, dir)
    }

    #[tokio::test]
    async fn answer_returns_text_and_ordered_sources() {
        let generation = Arc::new(StubGeneration::instant());
        let (pipeline, _dir) = pipeline_with(
            StubEmbeddings {
                delay: Duration::ZERO,
                fail: false,
            },
            Arc::clone(&generation),
        );

        let answer = pipeline.answer("what is near?", &[]).await.unwrap();
        assert_eq!(answer.answer, "generated answer");
        assert_eq!(answer.sources, vec!["near.md".to_string(), "far.md".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn embed_timeout_is_classified_and_skips_generation() {
        let generation = Arc::new(StubGeneration::instant());
        let (pipeline, _dir) = pipeline_with(
            StubEmbeddings {
                delay: Duration::from_secs(3600),
                fail: false,
            },
            Arc::clone(&generation),
        );

        let err = pipeline.answer("q", &[]).await.unwrap_err();
        assert!(matches!(err, ChatError::EmbedTimeout));
        assert!(err.is_timeout());
        assert!(!generation.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn embed_service_error_is_not_a_timeout() {
        let generation = Arc::new(StubGeneration::instant());
        let (pipeline, _dir) = pipeline_with(
            StubEmbeddings {
                delay: Duration::ZERO,
                fail: true,
            },
            Arc::clone(&generation),
        );

        let err = pipeline.answer("q", &[]).await.unwrap_err();
        assert!(matches!(err, ChatError::Embedding(_)));
        assert!(!err.is_timeout());
        assert!(!generation.called.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn generate_timeout_is_classified() {
        let generation = Arc::new(StubGeneration {
            called: AtomicBool::new(false),
            delay: Duration::from_secs(3600),
        });
        let (pipeline, _dir) = pipeline_with(
            StubEmbeddings {
                delay: Duration::ZERO,
                fail: false,
            },
            Arc::clone(&generation),
        );

        let err = pipeline.answer("q", &[]).await.unwrap_err();
        assert!(matches!(err, ChatError::GenerateTimeout));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn empty_index_still_answers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (index, _) = VectorIndex::open(dir.path().join("vector_store"), 2);
        let generation = Arc::new(StubGeneration::instant());
        let pipeline = ChatPipeline::new(
            Arc::new(StubEmbeddings {
                delay: Duration::ZERO,
                fail: false,
            }),
            Arc::new(index),
            generation,
        );

        let answer = pipeline.answer("q", &[]).await.unwrap();
        assert_eq!(answer.answer, "generated answer");
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn answer_stream_yields_sources_then_fragments() {
        let generation = Arc::new(StubGeneration::instant());
        let (pipeline, _dir) = pipeline_with(
            StubEmbeddings {
                delay: Duration::ZERO,
                fail: false,
            },
            Arc::clone(&generation),
        );

        let (sources, mut fragments) = pipeline.answer_stream("q", &[]).await.unwrap();
        assert_eq!(sources, vec!["near.md".to_string(), "far.md".to_string()]);

        let mut collected = String::new();
        while let Some(fragment) = fragments.next().await {
            collected.push_str(&fragment.unwrap());
        }
        assert_eq!(collected, "generated answer");
    }
}
