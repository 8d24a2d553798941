mod config;
mod error;
mod message;
mod pipeline_stream;
mod train_stream;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use message::PipelineMessage;
pub use pipeline_stream::PipelineStream;
pub use train_stream::TrainStream;
