use dataset::DatasetError;
use thiserror::Error;
use train::VanError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load batch.")]
    Dataset(#[from] DatasetError),

    #[error("Training step failed.")]
    Van(#[from] VanError),

    #[error("Invalid pipeline config: {0}")]
    InvalidConfig(&'static str),
}
