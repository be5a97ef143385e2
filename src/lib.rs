//! RAG backend for the TestWise documentation assistant.
//!
//! Answers natural-language questions about test automation tools by
//! retrieving relevant passages from a persistent vector index and
//! handing them, with the question, to a chat-completion service.

pub mod chat;
pub mod config;
pub mod ingest;
pub mod llm;
pub mod rag;
pub mod server;
