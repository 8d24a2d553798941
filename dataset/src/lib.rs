mod batch;
mod collate;
mod config;
mod error;
mod loader;
mod structure;

pub mod dummy;
pub mod pose;
pub mod transforms;

pub use batch::{Batch, FieldName, PackedPoses, length_mask};
pub use collate::{Collation, collate, nonstrict_collate};
pub use config::LoaderConfig;
pub use error::{DatasetError, Result};
pub use loader::TransferCollator;
pub use structure::{Leaf, Node};
