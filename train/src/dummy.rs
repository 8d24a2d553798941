//! Small single parameter modules for exercising the orchestrator end to end.

use std::collections::BTreeMap;

use burn::module::{Module, Param};
use burn::optim::SgdConfig;
use burn::prelude::{Backend, Tensor};
use burn::tensor::backend::AutodiffBackend;
use dataset::Batch;

use crate::component::{Component, TaskHandle};
use crate::config::VanConfig;
use crate::context::Context;
use crate::img::normalize_img;
use crate::losses::Losses;
use crate::task::{BevTask, BevUpsampler, FrameEncoder, FrameMerger};
use crate::van::BevTaskVan;

fn scalar_param<B: Backend>(value: f32, device: &B::Device) -> Param<Tensor<B, 1>> {
    Param::from_tensor(Tensor::from_floats([value], device))
}

fn broadcast<B: Backend>(param: &Param<Tensor<B, 1>>) -> Tensor<B, 4> {
    param.val().reshape([1, 1, 1, 1])
}

/// Averages the color channels and multiplies by a learned scale.
#[derive(Module, Debug)]
pub struct DummyEncoder<B: Backend> {
    pub scale: Param<Tensor<B, 1>>,
}

impl<B: Backend> DummyEncoder<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            scale: scalar_param(1.0, device),
        }
    }
}

impl<B: Backend> FrameEncoder<B> for DummyEncoder<B> {
    fn encode(&self, colors: BTreeMap<String, Tensor<B, 4>>) -> BTreeMap<String, Tensor<B, 4>> {
        colors
            .into_iter()
            .map(|(cam, color)| (cam, color.mean_dim(1) * broadcast(&self.scale)))
            .collect()
    }
}

/// Sums every camera of every frame and multiplies by a learned weight.
#[derive(Module, Debug)]
pub struct DummyMerger<B: Backend> {
    pub weight: Param<Tensor<B, 1>>,
}

impl<B: Backend> DummyMerger<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            weight: scalar_param(0.5, device),
        }
    }
}

impl<B: Backend> FrameMerger<B> for DummyMerger<B> {
    fn merge(&self, _batch: &Batch<B>, frames: Vec<BTreeMap<String, Tensor<B, 4>>>) -> Tensor<B, 4> {
        let merged = frames
            .into_iter()
            .flat_map(|frame| frame.into_values())
            .reduce(|a, b| a + b)
            .expect("At least one encoded camera frame");
        merged * broadcast(&self.weight)
    }
}

/// Doubles the grid resolution and applies a learned gain.
#[derive(Module, Debug)]
pub struct DummyUpsampler<B: Backend> {
    pub gain: Param<Tensor<B, 1>>,
}

impl<B: Backend> DummyUpsampler<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            gain: scalar_param(1.0, device),
        }
    }
}

impl<B: Backend> BevUpsampler<B> for DummyUpsampler<B> {
    fn upsample(&self, bev: Tensor<B, 4>) -> Tensor<B, 4> {
        bev.repeat_dim(2, 2).repeat_dim(3, 2) * broadcast(&self.gain)
    }
}

/// Pulls the grid towards a learned constant. Reports a per example `l2`
/// loss and an untracked `bev_mean` metric.
#[derive(Module, Debug)]
pub struct DummyTask<B: Backend> {
    pub target: Param<Tensor<B, 1>>,
}

impl<B: Backend> DummyTask<B> {
    pub fn new(target: f32, device: &B::Device) -> Self {
        Self {
            target: scalar_param(target, device),
        }
    }
}

impl<B: AutodiffBackend> BevTask<B> for DummyTask<B> {
    fn forward(&self, ctx: &mut Context<B>, _batch: &Batch<B>, bev: Tensor<B, 4>) -> Losses<B> {
        let [bs, _, _, _] = bev.dims();
        let l2 = (bev.clone() - broadcast(&self.target))
            .powf_scalar(2.0)
            .reshape([bs as i32, -1])
            .mean_dim(1)
            .squeeze::<1>(1);

        if ctx.log_img {
            let first = bev.clone().narrow(0, 0, 1).narrow(1, 0, 1).squeeze::<3>(0);
            if let Ok(img) = normalize_img(first) {
                ctx.add_image("bev", &img);
            }
        }

        let mut losses = Losses::new();
        losses.insert("l2", l2);
        losses.insert_metric("bev_mean", bev.mean());
        losses
    }
}

fn task<B: AutodiffBackend>(target: f32, device: &B::Device) -> Box<dyn TaskHandle<B>> {
    Box::new(Component::new(
        DummyTask::<B>::new(target, device),
        SgdConfig::new().init::<B, DummyTask<B>>(),
    ))
}

/// An orchestrator over the dummy modules for the `left` and `right` cameras of
/// [`dataset::dummy::dummy_item`], with one `dummy` task and, if `hr` is set,
/// one `dummy_hr` high resolution task.
pub fn dummy_van<B: AutodiffBackend>(hr: bool, device: &B::Device) -> BevTaskVan<B> {
    let config = VanConfig::new(vec!["left".to_string(), "right".to_string()], 1)
        .with_hr_dim(hr.then_some(1));

    let encoder = Component::new(
        DummyEncoder::<B>::new(device),
        SgdConfig::new().init::<B, DummyEncoder<B>>(),
    );
    let merger = Component::new(
        DummyMerger::<B>::new(device),
        SgdConfig::new().init::<B, DummyMerger<B>>(),
    );

    let mut builder = BevTaskVan::builder(config, Box::new(encoder), Box::new(merger))
        .task("dummy", task(0.25, device));
    if hr {
        let upsampler = Component::new(
            DummyUpsampler::<B>::new(device),
            SgdConfig::new().init::<B, DummyUpsampler<B>>(),
        );
        builder = builder
            .hr_task("dummy_hr", task(0.75, device))
            .upsampler(Box::new(upsampler));
    }
    builder
        .build()
        .expect("Dummy orchestrator is configured consistently")
}
