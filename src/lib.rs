use thiserror::Error;

pub type Result<T> = std::result::Result<T, InsightError>;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] ingest::SchemaError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] retrieval::RetrievalError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] synthesis::SynthesisError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod analysis;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod ingest;
pub mod pipeline;
pub mod retrieval;
pub mod synthesis;
