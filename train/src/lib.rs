pub mod config;
pub mod dummy;

mod component;
mod context;
mod error;
mod img;
mod losses;
mod scaler;
mod sink;
mod task;
mod van;

pub use component::{
    Component, EncoderHandle, Learnable, MergerHandle, TaskHandle, UpsamplerHandle,
};
pub use context::{Context, should_log};
pub use error::{Result, VanError};
pub use img::normalize_img;
pub use losses::{Loss, Losses};
pub use scaler::{GradScaler, StaticLossScale};
pub use sink::{LogSink, TracingSink};
pub use task::{BevTask, BevUpsampler, FrameEncoder, FrameMerger};
pub use van::{BevTaskVan, BevTaskVanBuilder, NamedTask};
