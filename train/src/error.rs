use thiserror::Error;

pub type Result<T> = std::result::Result<T, VanError>;

#[derive(Debug, Error)]
pub enum VanError {
    #[error("No tasks specified, need at least one base or high resolution task.")]
    NoTasks,

    #[error("High resolution tasks need `hr_dim` to be configured.")]
    MissingHrDim,

    #[error("High resolution tasks need an upsampler.")]
    MissingUpsampler,

    #[error("Task name '{0}' is used more than once.")]
    DuplicateTask(String),

    #[error("Batch has {available} frames but {required} are encoded.")]
    NotEnoughFrames { required: usize, available: usize },

    #[error("The {grid} grid has {actual} channels, expected {expected}.")]
    GridChannels {
        grid: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Camera '{0}' is missing from the batch.")]
    MissingCamera(String),

    #[error("Can't convert a {0} channel tensor to an image.")]
    ImageChannels(usize),
}
