use std::collections::BTreeMap;

use burn::module::AutodiffModule;
use burn::optim::{GradientsAccumulator, GradientsParams, Optimizer};
use burn::prelude::Tensor;
use burn::tensor::backend::AutodiffBackend;
use dataset::Batch;

use crate::context::Context;
use crate::losses::Losses;
use crate::task::{BevTask, BevUpsampler, FrameEncoder, FrameMerger};

/// A module that owns its parameters and their optimizer.
pub trait Learnable<B: AutodiffBackend>: Send {
    /// Moves this module's gradients out of `grads` into its accumulator.
    fn collect_grads(&mut self, grads: &mut B::Gradients);

    /// Applies the accumulated gradients, if any, and clears them.
    fn step(&mut self, lr: f64);
}

pub trait TaskHandle<B: AutodiffBackend>: Learnable<B> {
    fn forward(&self, ctx: &mut Context<B>, batch: &Batch<B>, bev: Tensor<B, 4>) -> Losses<B>;
}

pub trait EncoderHandle<B: AutodiffBackend>: Learnable<B> {
    /// With `track` off the frame is encoded without recording a graph.
    fn encode(
        &self,
        colors: BTreeMap<String, Tensor<B, 4>>,
        track: bool,
    ) -> BTreeMap<String, Tensor<B, 4>>;
}

pub trait MergerHandle<B: AutodiffBackend>: Learnable<B> {
    fn merge(&self, batch: &Batch<B>, frames: Vec<BTreeMap<String, Tensor<B, 4>>>) -> Tensor<B, 4>;
}

pub trait UpsamplerHandle<B: AutodiffBackend>: Learnable<B> {
    fn upsample(&self, bev: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Pairs a module with its optimizer and the gradients collected for it
/// during the current step.
pub struct Component<M, O> {
    module: M,
    optim: O,
    accumulator: GradientsAccumulator<M>,
}

impl<M, O> Component<M, O> {
    pub fn new(module: M, optim: O) -> Self {
        Self {
            module,
            optim,
            accumulator: GradientsAccumulator::new(),
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn into_module(self) -> M {
        self.module
    }
}

impl<B, M, O> Learnable<B> for Component<M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn collect_grads(&mut self, grads: &mut B::Gradients) {
        let params = GradientsParams::from_module::<B, M>(grads, &self.module);
        if !params.is_empty() {
            self.accumulator.accumulate::<B>(&self.module, params);
        }
    }

    fn step(&mut self, lr: f64) {
        let grads = self.accumulator.grads();
        if grads.is_empty() {
            return;
        }
        self.module = self.optim.step(lr, self.module.clone(), grads);
    }
}

impl<B, M, O> TaskHandle<B> for Component<M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + BevTask<B>,
    O: Optimizer<M, B>,
{
    fn forward(&self, ctx: &mut Context<B>, batch: &Batch<B>, bev: Tensor<B, 4>) -> Losses<B> {
        self.module.forward(ctx, batch, bev)
    }
}

impl<B, M, O> EncoderHandle<B> for Component<M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + FrameEncoder<B>,
    M::InnerModule: FrameEncoder<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    fn encode(
        &self,
        colors: BTreeMap<String, Tensor<B, 4>>,
        track: bool,
    ) -> BTreeMap<String, Tensor<B, 4>> {
        if track {
            return self.module.encode(colors);
        }
        let colors = colors.into_iter().map(|(cam, c)| (cam, c.inner())).collect();
        self.module
            .valid()
            .encode(colors)
            .into_iter()
            .map(|(cam, f)| (cam, Tensor::from_inner(f)))
            .collect()
    }
}

impl<B, M, O> MergerHandle<B> for Component<M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + FrameMerger<B>,
    O: Optimizer<M, B>,
{
    fn merge(&self, batch: &Batch<B>, frames: Vec<BTreeMap<String, Tensor<B, 4>>>) -> Tensor<B, 4> {
        self.module.merge(batch, frames)
    }
}

impl<B, M, O> UpsamplerHandle<B> for Component<M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + BevUpsampler<B>,
    O: Optimizer<M, B>,
{
    fn upsample(&self, bev: Tensor<B, 4>) -> Tensor<B, 4> {
        self.module.upsample(bev)
    }
}
