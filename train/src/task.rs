//! Contracts for the learned pieces wired together by the orchestrator.
//! Architectures live outside this crate and only implement these traits.

use std::collections::BTreeMap;

use burn::prelude::{Backend, Tensor};
use burn::tensor::backend::AutodiffBackend;
use dataset::Batch;

use crate::context::Context;
use crate::losses::Losses;

/// A head that consumes the BEV grid and reports named losses.
///
/// Implementations may log through the context but must not keep the grid
/// beyond the call.
pub trait BevTask<B: AutodiffBackend> {
    fn forward(&self, ctx: &mut Context<B>, batch: &Batch<B>, bev: Tensor<B, 4>) -> Losses<B>;
}

/// Encodes the images of every camera for one frame, `[BS, 3, H, W]` in and
/// `[BS, C, h, w]` out per camera.
pub trait FrameEncoder<B: Backend> {
    fn encode(&self, colors: BTreeMap<String, Tensor<B, 4>>) -> BTreeMap<String, Tensor<B, 4>>;
}

/// Merges the encoded frames, oldest first, into one `[BS, dim, X, Y]` grid.
pub trait FrameMerger<B: Backend> {
    fn merge(&self, batch: &Batch<B>, frames: Vec<BTreeMap<String, Tensor<B, 4>>>) -> Tensor<B, 4>;
}

/// Lifts the coarse grid to a finer `[BS, hr_dim, X', Y']` grid.
pub trait BevUpsampler<B: Backend> {
    fn upsample(&self, bev: Tensor<B, 4>) -> Tensor<B, 4>;
}
