use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use burn::prelude::Tensor;
use burn::tensor::backend::AutodiffBackend;
use dataset::Batch;
use tracing::trace_span;

use crate::component::{EncoderHandle, MergerHandle, TaskHandle, UpsamplerHandle};
use crate::config::VanConfig;
use crate::context::{Context, should_log};
use crate::error::{Result, VanError};
use crate::losses::Losses;
use crate::scaler::GradScaler;
use crate::sink::LogSink;

pub type NamedTask<B> = (String, Box<dyn TaskHandle<B>>);

type LatentGrad<B> = Tensor<<B as AutodiffBackend>::InnerBackend, 4>;

fn accumulate<B: AutodiffBackend>(
    total: Option<LatentGrad<B>>,
    grad: Option<LatentGrad<B>>,
) -> Option<LatentGrad<B>> {
    match (total, grad) {
        (Some(total), Some(grad)) => Some(total + grad),
        (total, grad) => total.or(grad),
    }
}

/// Pushes a gradient collected on a detached copy of `latent` back through the
/// graph that produced it.
fn replay<B: AutodiffBackend>(latent: Tensor<B, 4>, grad: LatentGrad<B>) -> B::Gradients {
    let _span = trace_span!("Replay gradients").entered();
    (latent * Tensor::from_inner(grad)).sum().backward()
}

fn check_channels<B: AutodiffBackend>(grid: &'static str, expected: usize, bev: &Tensor<B, 4>) -> Result<()> {
    let actual = bev.dims()[1];
    if actual != expected {
        return Err(VanError::GridChannels {
            grid,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Runs every task against `bev`, a detached leaf, backpropagating after each
/// one. Returns the gradient the tasks accumulated on `bev`.
fn run_tasks<B: AutodiffBackend>(
    tasks: &mut [NamedTask<B>],
    ctx: &mut Context<B>,
    batch: &Batch<B>,
    bev: &Tensor<B, 4>,
    losses: &mut Losses<B>,
    task_times: &mut BTreeMap<String, f32>,
) -> Option<LatentGrad<B>> {
    let mut bev_grad = None;

    for (name, task) in tasks.iter_mut() {
        ctx.name = name.clone();
        let task_start = Instant::now();

        let mut task_losses = trace_span!("Task forward", task = name.as_str())
            .in_scope(|| task.forward(ctx, batch, bev.clone()));
        ctx.backward(&mut task_losses);

        for mut grads in ctx.take_grads() {
            task.collect_grads(&mut grads);
            bev_grad = accumulate::<B>(bev_grad, bev.grad_remove(&mut grads));
        }

        task_times.insert(name.clone(), task_start.elapsed().as_secs_f32());
        losses.extend_prefixed(name, task_losses);
    }

    bev_grad
}

/// Encodes a window of frames into a shared BEV grid and trains every task
/// head on it, each with its own backward pass.
///
/// Tasks see a detached copy of the grid. Their gradients on that copy are
/// summed and replayed into the upsampler, merger and encoder once all tasks
/// ran, so tasks never share a graph.
pub struct BevTaskVan<B: AutodiffBackend> {
    config: VanConfig,
    encoder: Box<dyn EncoderHandle<B>>,
    merger: Box<dyn MergerHandle<B>>,
    upsampler: Option<Box<dyn UpsamplerHandle<B>>>,
    tasks: Vec<NamedTask<B>>,
    hr_tasks: Vec<NamedTask<B>>,
    sink: Option<Arc<dyn LogSink>>,
    scaler: Option<Arc<dyn GradScaler<B>>>,
}

pub struct BevTaskVanBuilder<B: AutodiffBackend> {
    van: BevTaskVan<B>,
}

impl<B: AutodiffBackend> BevTaskVanBuilder<B> {
    /// Adds a task on the coarse grid. Tasks run in insertion order.
    pub fn task(mut self, name: impl Into<String>, task: Box<dyn TaskHandle<B>>) -> Self {
        self.van.tasks.push((name.into(), task));
        self
    }

    /// Adds a task on the upsampled grid, run after every coarse task.
    pub fn hr_task(mut self, name: impl Into<String>, task: Box<dyn TaskHandle<B>>) -> Self {
        self.van.hr_tasks.push((name.into(), task));
        self
    }

    pub fn upsampler(mut self, upsampler: Box<dyn UpsamplerHandle<B>>) -> Self {
        self.van.upsampler = Some(upsampler);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.van.sink = Some(sink);
        self
    }

    pub fn scaler(mut self, scaler: Arc<dyn GradScaler<B>>) -> Self {
        self.van.scaler = Some(scaler);
        self
    }

    pub fn build(self) -> Result<BevTaskVan<B>> {
        let van = self.van;
        if van.tasks.is_empty() && van.hr_tasks.is_empty() {
            return Err(VanError::NoTasks);
        }
        if !van.hr_tasks.is_empty() {
            if van.config.hr_dim.is_none() {
                return Err(VanError::MissingHrDim);
            }
            if van.upsampler.is_none() {
                return Err(VanError::MissingUpsampler);
            }
        }

        let mut seen = HashSet::new();
        for (name, _) in van.tasks.iter().chain(&van.hr_tasks) {
            if !seen.insert(name.as_str()) {
                return Err(VanError::DuplicateTask(name.clone()));
            }
        }

        log::info!(
            "Training {} tasks and {} high resolution tasks on {} cameras",
            van.tasks.len(),
            van.hr_tasks.len(),
            van.config.cameras.len()
        );
        Ok(van)
    }
}

impl<B: AutodiffBackend> BevTaskVan<B> {
    pub fn builder(
        config: VanConfig,
        encoder: Box<dyn EncoderHandle<B>>,
        merger: Box<dyn MergerHandle<B>>,
    ) -> BevTaskVanBuilder<B> {
        BevTaskVanBuilder {
            van: Self {
                config,
                encoder,
                merger,
                upsampler: None,
                tasks: vec![],
                hr_tasks: vec![],
                sink: None,
                scaler: None,
            },
        }
    }

    pub fn config(&self) -> &VanConfig {
        &self.config
    }

    /// Task names in execution order, high resolution tasks last.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks
            .iter()
            .chain(&self.hr_tasks)
            .map(|(name, _)| name.as_str())
    }

    pub fn should_log(&self, global_step: usize) -> (bool, bool) {
        should_log(global_step, self.config.log_interval, self.sink.is_some())
    }

    /// Frames every configured camera can provide, at most `cam_t`'s count.
    fn available_frames(&self, batch: &Batch<B>) -> Result<usize> {
        self.config
            .cameras
            .iter()
            .try_fold(batch.num_frames(), |frames, cam| {
                let color = batch
                    .color
                    .get(cam)
                    .ok_or_else(|| VanError::MissingCamera(cam.clone()))?;
                Ok(frames.min(color.dims()[1]))
            })
    }

    /// Color of the configured cameras at `frame`, `[BS, 3, H, W]` each.
    fn frame_colors(&self, batch: &Batch<B>, frame: usize) -> Result<BTreeMap<String, Tensor<B, 4>>> {
        self.config
            .cameras
            .iter()
            .map(|cam| {
                let color = batch
                    .color
                    .get(cam)
                    .ok_or_else(|| VanError::MissingCamera(cam.clone()))?;
                Ok((cam.clone(), color.clone().narrow(1, frame, 1).squeeze(1)))
            })
            .collect()
    }

    /// Runs one training step worth of forward and backward passes.
    ///
    /// Gradients are collected into each component, call [`BevTaskVan::step`]
    /// to apply them. Returns every task loss, detached and keyed
    /// `<task>-<loss>`.
    pub fn forward(&mut self, batch: &Batch<B>, global_step: usize) -> Result<Losses<B>> {
        let num_encode_frames = self.config.num_encode_frames;
        let available = self.available_frames(batch)?;
        if available < num_encode_frames {
            return Err(VanError::NotEnoughFrames {
                required: num_encode_frames,
                available,
            });
        }
        let (log_img, log_text) = self.should_log(global_step);

        let first_backprop_frame = num_encode_frames.saturating_sub(self.config.num_backprop_frames);
        let bev_frames = {
            let _span = trace_span!("Encode frames", frames = num_encode_frames).entered();
            (0..num_encode_frames)
                .map(|frame| {
                    let colors = self.frame_colors(batch, frame)?;
                    Ok(self.encoder.encode(colors, frame >= first_backprop_frame))
                })
                .collect::<Result<Vec<_>>>()?
        };
        let bev = trace_span!("Merge frames").in_scope(|| self.merger.merge(batch, bev_frames));
        check_channels("bev", self.config.dim, &bev)?;

        let mut ctx = Context::new(global_step, batch.weight.clone())
            .with_logging(self.sink.clone(), log_img, log_text)
            .with_scaler(self.scaler.clone())
            .with_output(num_encode_frames.saturating_sub(1), self.config.output.clone());
        let mut losses = Losses::new();
        let mut task_times = BTreeMap::new();

        let bev_leaf = bev.clone().detach().require_grad();
        let mut bev_grad = run_tasks(
            &mut self.tasks,
            &mut ctx,
            batch,
            &bev_leaf,
            &mut losses,
            &mut task_times,
        );

        if !self.hr_tasks.is_empty() {
            let upsampler = self.upsampler.as_mut().ok_or(VanError::MissingUpsampler)?;
            let hr_bev = trace_span!("Upsample").in_scope(|| upsampler.upsample(bev_leaf.clone()));
            let hr_dim = self.config.hr_dim.ok_or(VanError::MissingHrDim)?;
            check_channels("hr_bev", hr_dim, &hr_bev)?;
            let hr_leaf = hr_bev.clone().detach().require_grad();
            let hr_grad = run_tasks(
                &mut self.hr_tasks,
                &mut ctx,
                batch,
                &hr_leaf,
                &mut losses,
                &mut task_times,
            );

            if let Some(hr_grad) = hr_grad {
                let mut grads = replay(hr_bev, hr_grad);
                upsampler.collect_grads(&mut grads);
                bev_grad = accumulate::<B>(bev_grad, bev_leaf.grad_remove(&mut grads));
            }
        }

        if let Some(bev_grad) = bev_grad {
            let mut grads = replay(bev, bev_grad);
            self.merger.collect_grads(&mut grads);
            self.encoder.collect_grads(&mut grads);
        }

        if log_text {
            if let Some(sink) = &self.sink {
                sink.add_scalars("task_times", &task_times, global_step);
            }
        }

        Ok(losses)
    }

    /// Applies the gradients collected by [`BevTaskVan::forward`] to every
    /// component.
    pub fn step(&mut self, lr: f64) {
        let _span = trace_span!("Optimizer step").entered();
        self.encoder.step(lr);
        self.merger.step(lr);
        if let Some(upsampler) = self.upsampler.as_mut() {
            upsampler.step(lr);
        }
        for (_, task) in self.tasks.iter_mut().chain(self.hr_tasks.iter_mut()) {
            task.step(lr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Learnable;
    use crate::dummy::{DummyTask, dummy_van};
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::SgdConfig;
    use burn::tensor::ElementConversion;
    use dataset::dummy::{dummy_batch, dummy_item_with};
    use image::DynamicImage;
    use std::sync::Mutex;

    type B = Autodiff<NdArray>;
    type Device = <B as burn::prelude::Backend>::Device;
    type Grads = <B as AutodiffBackend>::Gradients;

    fn param(value: f32, device: &Device) -> Tensor<B, 1> {
        Tensor::from_floats([value], device).require_grad()
    }

    fn spread(p: &Tensor<B, 1>) -> Tensor<B, 4> {
        p.clone().reshape([1, 1, 1, 1])
    }

    fn encode_with(
        p: &Tensor<B, 1>,
        colors: BTreeMap<String, Tensor<B, 4>>,
        track: bool,
    ) -> BTreeMap<String, Tensor<B, 4>> {
        let p = if track { p.clone() } else { p.clone().detach() };
        colors
            .into_iter()
            .map(|(cam, c)| (cam, c.mean_dim(1) * spread(&p)))
            .collect()
    }

    fn merge_with(p: &Tensor<B, 1>, frames: Vec<BTreeMap<String, Tensor<B, 4>>>) -> Tensor<B, 4> {
        let sum = frames
            .into_iter()
            .flat_map(|f| f.into_values())
            .reduce(|a, b| a + b)
            .unwrap();
        sum * spread(p)
    }

    fn upsample_with(p: &Tensor<B, 1>, bev: Tensor<B, 4>) -> Tensor<B, 4> {
        bev.powf_scalar(2.0) * spread(p)
    }

    fn task_loss(p: &Tensor<B, 1>, bev: Tensor<B, 4>) -> Tensor<B, 1> {
        let [bs, _, _, _] = bev.dims();
        (bev - spread(p))
            .powf_scalar(2.0)
            .reshape([bs as i32, -1])
            .mean_dim(1)
            .squeeze::<1>(1)
    }

    /// A handle around a single raw parameter that records its gradients.
    struct ScalarHandle {
        param: Tensor<B, 1>,
        grads: Arc<Mutex<Vec<f32>>>,
    }

    impl ScalarHandle {
        fn new(value: f32, device: &Device) -> (Self, Arc<Mutex<Vec<f32>>>) {
            let grads = Arc::new(Mutex::new(vec![]));
            let handle = Self {
                param: param(value, device),
                grads: grads.clone(),
            };
            (handle, grads)
        }
    }

    impl Learnable<B> for ScalarHandle {
        fn collect_grads(&mut self, grads: &mut Grads) {
            if let Some(g) = self.param.grad_remove(grads) {
                self.grads.lock().unwrap().push(g.into_scalar().elem());
            }
        }

        fn step(&mut self, _lr: f64) {}
    }

    impl EncoderHandle<B> for ScalarHandle {
        fn encode(
            &self,
            colors: BTreeMap<String, Tensor<B, 4>>,
            track: bool,
        ) -> BTreeMap<String, Tensor<B, 4>> {
            encode_with(&self.param, colors, track)
        }
    }

    impl MergerHandle<B> for ScalarHandle {
        fn merge(&self, _: &Batch<B>, frames: Vec<BTreeMap<String, Tensor<B, 4>>>) -> Tensor<B, 4> {
            merge_with(&self.param, frames)
        }
    }

    impl UpsamplerHandle<B> for ScalarHandle {
        fn upsample(&self, bev: Tensor<B, 4>) -> Tensor<B, 4> {
            upsample_with(&self.param, bev)
        }
    }

    impl TaskHandle<B> for ScalarHandle {
        fn forward(&self, _: &mut Context<B>, _: &Batch<B>, bev: Tensor<B, 4>) -> Losses<B> {
            let mut losses = Losses::new();
            losses.insert("l2", task_loss(&self.param, bev));
            losses
        }
    }

    fn config() -> VanConfig {
        VanConfig::new(vec!["left".to_string(), "right".to_string()], 1)
    }

    fn total(grads: &Arc<Mutex<Vec<f32>>>) -> f32 {
        grads.lock().unwrap().iter().sum()
    }

    fn grad_of(p: &Tensor<B, 1>, grads: &Grads) -> f32 {
        p.grad(grads).unwrap().into_scalar().elem()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() <= 1e-4 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn replay_matches_joint_backward() {
        let device: Device = Default::default();
        let batch = dummy_batch::<B>(&device);

        let (encoder, enc_grads) = ScalarHandle::new(1.5, &device);
        let (merger, merge_grads) = ScalarHandle::new(0.5, &device);
        let (upsampler, up_grads) = ScalarHandle::new(0.8, &device);
        let (task_a, a_grads) = ScalarHandle::new(0.2, &device);
        let (task_b, b_grads) = ScalarHandle::new(-0.3, &device);
        let (task_hr, hr_grads) = ScalarHandle::new(0.6, &device);

        let mut van = BevTaskVan::builder(
            config().with_hr_dim(Some(1)),
            Box::new(encoder),
            Box::new(merger),
        )
        .task("a", Box::new(task_a))
        .task("b", Box::new(task_b))
        .hr_task("hr", Box::new(task_hr))
        .upsampler(Box::new(upsampler))
        .build()
        .unwrap();
        let losses = van.forward(&batch, 1).unwrap();
        assert_eq!(losses.names().collect::<Vec<_>>(), vec!["a-l2", "b-l2", "hr-l2"]);

        // Everything in one graph with a single backward pass.
        let (pe, pm, pu) = (param(1.5, &device), param(0.5, &device), param(0.8, &device));
        let (pa, pb, ph) = (param(0.2, &device), param(-0.3, &device), param(0.6, &device));
        let frames = (0..3)
            .map(|frame| {
                let mut colors = batch.frame_colors(frame);
                colors.retain(|cam, _| cam == "left" || cam == "right");
                encode_with(&pe, colors, frame >= 1)
            })
            .collect();
        let bev = merge_with(&pm, frames);
        let hr_bev = upsample_with(&pu, bev.clone());
        let weights = batch.weight.clone();
        let joint = (task_loss(&pa, bev.clone()) * weights.clone()).sum()
            + (task_loss(&pb, bev) * weights.clone()).sum()
            + (task_loss(&ph, hr_bev) * weights).sum();
        let grads = joint.backward();

        assert!(close(total(&enc_grads), grad_of(&pe, &grads)));
        assert!(close(total(&merge_grads), grad_of(&pm, &grads)));
        assert!(close(total(&up_grads), grad_of(&pu, &grads)));
        assert!(close(total(&a_grads), grad_of(&pa, &grads)));
        assert!(close(total(&b_grads), grad_of(&pb, &grads)));
        assert!(close(total(&hr_grads), grad_of(&ph, &grads)));
        // Each component receives exactly one gradient per step.
        assert_eq!(enc_grads.lock().unwrap().len(), 1);
        assert_eq!(a_grads.lock().unwrap().len(), 1);
    }

    #[test]
    fn single_task_losses_are_prefixed() {
        let device: Device = Default::default();
        let mut van = dummy_van::<B>(false, &device);
        let losses = van.forward(&dummy_batch(&device), 3).unwrap();

        assert_eq!(losses.names().collect::<Vec<_>>(), vec!["dummy-l2", "dummy-bev_mean"]);
        assert!(losses.iter().all(|(_, l)| !l.is_tracked()));
        assert_eq!(losses.get("dummy-l2").unwrap().value.dims(), [1]);
        assert_eq!(van.task_names().collect::<Vec<_>>(), vec!["dummy"]);
    }

    #[test]
    fn step_updates_parameters() {
        let device: Device = Default::default();
        let batch = dummy_batch::<B>(&device);
        let mut van = dummy_van::<B>(true, &device);

        let before = van.forward(&batch, 1).unwrap().to_scalars();
        van.step(0.01);
        let after = van.forward(&batch, 2).unwrap().to_scalars();
        assert!(after["dummy-l2"] < before["dummy-l2"]);
        assert!(after["dummy_hr-l2"] < before["dummy_hr-l2"]);
    }

    fn task_component(device: &Device) -> Box<dyn TaskHandle<B>> {
        Box::new(crate::component::Component::new(
            DummyTask::<B>::new(0.0, device),
            SgdConfig::new().init::<B, DummyTask<B>>(),
        ))
    }

    fn scalar_builder(config: VanConfig, device: &Device) -> BevTaskVanBuilder<B> {
        BevTaskVan::builder(
            config,
            Box::new(ScalarHandle::new(1.0, device).0),
            Box::new(ScalarHandle::new(1.0, device).0),
        )
    }

    #[test]
    fn construction_errors() {
        let device: Device = Default::default();

        let no_tasks = scalar_builder(config(), &device).build();
        assert!(matches!(no_tasks, Err(VanError::NoTasks)));

        let no_hr_dim = scalar_builder(config(), &device)
            .hr_task("hr", task_component(&device))
            .upsampler(Box::new(ScalarHandle::new(1.0, &device).0))
            .build();
        assert!(matches!(no_hr_dim, Err(VanError::MissingHrDim)));

        let no_upsampler = scalar_builder(config().with_hr_dim(Some(4)), &device)
            .hr_task("hr", task_component(&device))
            .build();
        assert!(matches!(no_upsampler, Err(VanError::MissingUpsampler)));

        let duplicate = scalar_builder(config().with_hr_dim(Some(4)), &device)
            .task("occ", task_component(&device))
            .hr_task("occ", task_component(&device))
            .upsampler(Box::new(ScalarHandle::new(1.0, &device).0))
            .build();
        assert!(matches!(duplicate, Err(VanError::DuplicateTask(name)) if name == "occ"));

        let hr_only = scalar_builder(config().with_hr_dim(Some(4)), &device)
            .hr_task("hr", task_component(&device))
            .upsampler(Box::new(ScalarHandle::new(1.0, &device).0))
            .build();
        assert!(hr_only.is_ok());
    }

    #[test]
    fn short_batches_are_rejected() {
        let device: Device = Default::default();
        let mut van = dummy_van::<B>(false, &device);
        let batch = dummy_item_with::<B>(2, 4, &device);
        assert!(matches!(
            van.forward(&batch, 0),
            Err(VanError::NotEnoughFrames { required: 3, available: 2 })
        ));
    }

    #[test]
    fn cameras_with_fewer_color_frames_are_rejected() {
        let device: Device = Default::default();
        let mut van = dummy_van::<B>(false, &device);
        let mut batch = dummy_batch::<B>(&device);
        let left = batch.color["left"].clone().narrow(1, 0, 2);
        batch.color.insert("left".to_string(), left);
        assert_eq!(batch.num_frames(), 3);

        assert!(matches!(
            van.forward(&batch, 0),
            Err(VanError::NotEnoughFrames { required: 3, available: 2 })
        ));
    }

    #[test]
    fn unconfigured_cameras_are_ignored() {
        let device: Device = Default::default();
        let mut van = dummy_van::<B>(false, &device);
        let mut batch = dummy_batch::<B>(&device);
        let rear = batch.color["left"].clone().narrow(1, 0, 1);
        batch.color.insert("rear".to_string(), rear);
        assert!(van.forward(&batch, 0).is_ok());
    }

    #[test]
    fn grid_channels_must_match_config() {
        let device: Device = Default::default();
        let mut van = scalar_builder(VanConfig::new(vec!["left".to_string(), "right".to_string()], 4), &device)
            .task("a", task_component(&device))
            .build()
            .unwrap();
        assert!(matches!(
            van.forward(&dummy_batch(&device), 0),
            Err(VanError::GridChannels { grid: "bev", expected: 4, actual: 1 })
        ));

        let mut van = scalar_builder(config().with_hr_dim(Some(3)), &device)
            .hr_task("hr", task_component(&device))
            .upsampler(Box::new(ScalarHandle::new(1.0, &device).0))
            .build()
            .unwrap();
        assert!(matches!(
            van.forward(&dummy_batch(&device), 0),
            Err(VanError::GridChannels { grid: "hr_bev", expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn missing_cameras_are_rejected() {
        let device: Device = Default::default();
        let mut van = scalar_builder(VanConfig::new(vec!["rear".to_string()], 1), &device)
            .task("a", task_component(&device))
            .build()
            .unwrap();
        assert!(matches!(
            van.forward(&dummy_batch(&device), 0),
            Err(VanError::MissingCamera(cam)) if cam == "rear"
        ));
    }

    #[derive(Default)]
    struct Recorder {
        keys: Mutex<Vec<String>>,
    }

    impl LogSink for Recorder {
        fn add_scalar(&self, key: &str, _: f32, _: usize) {
            self.keys.lock().unwrap().push(key.to_string());
        }
        fn add_scalars(&self, key: &str, values: &BTreeMap<String, f32>, _: usize) {
            let names: Vec<_> = values.keys().cloned().collect();
            self.keys.lock().unwrap().push(format!("{key}:{}", names.join(",")));
        }
        fn add_image(&self, key: &str, _: &DynamicImage, _: usize) {
            self.keys.lock().unwrap().push(key.to_string());
        }
        fn add_figure(&self, key: &str, _: &DynamicImage, _: usize) {
            self.keys.lock().unwrap().push(key.to_string());
        }
    }

    #[test]
    fn logs_images_and_task_times() {
        let device: Device = Default::default();
        let sink = Arc::new(Recorder::default());
        let mut van = BevTaskVan::builder(
            config(),
            Box::new(ScalarHandle::new(1.0, &device).0),
            Box::new(ScalarHandle::new(1.0, &device).0),
        )
        .task("dummy", task_component(&device))
        .sink(sink.clone())
        .build()
        .unwrap();
        let batch = dummy_batch(&device);

        van.forward(&batch, 500).unwrap();
        assert_eq!(
            *sink.keys.lock().unwrap(),
            vec!["dummy-bev".to_string(), "task_times:dummy".to_string()]
        );

        sink.keys.lock().unwrap().clear();
        van.forward(&batch, 501).unwrap();
        assert!(sink.keys.lock().unwrap().is_empty());
    }
}
