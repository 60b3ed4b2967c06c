use thiserror::Error;

use crate::pipeline::PipelineStatus;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("No documents found under {path}")]
    NoDocuments { path: String },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Index was built with embedding model '{index}' but '{configured}' is configured; reingest required"
    )]
    EmbeddingModelMismatch { index: String, configured: String },

    #[error("Pipeline is not ready (state: {status})")]
    NotInitialized { status: PipelineStatus },

    #[error("Indexing is already in progress")]
    IndexingInProgress,

    #[error("Question cannot be empty")]
    InvalidQuestion,

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod generation;
pub mod index;
pub mod ollama;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
