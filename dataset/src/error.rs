use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Not enough data in batch: {valid} of {requested} examples are usable")]
    InsufficientData { requested: usize, valid: usize },

    #[error("Can't split {0}")]
    Unsplittable(&'static str),

    #[error("Mismatched structure in field {field}: {reason}")]
    StructureMismatch { field: String, reason: String },

    #[error("Missing field {0}")]
    MissingField(&'static str),

    #[error("Invalid loader config: {0}")]
    InvalidConfig(&'static str),

    #[error("Failed to start the collator worker")]
    Worker(#[from] std::io::Error),

    #[error("Collator worker stopped unexpectedly")]
    WorkerGone,
}

pub(crate) fn mismatch(field: &str, reason: impl Into<String>) -> DatasetError {
    DatasetError::StructureMismatch {
        field: field.to_owned(),
        reason: reason.into(),
    }
}
