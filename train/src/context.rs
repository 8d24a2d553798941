use std::collections::BTreeMap;
use std::sync::Arc;

use burn::prelude::Tensor;
use burn::tensor::backend::AutodiffBackend;
use image::DynamicImage;
use tracing::trace_span;

use crate::losses::Losses;
use crate::scaler::GradScaler;
use crate::sink::LogSink;

/// Whether to log `(images, text)` at `step`. Without a sink nothing is logged.
pub fn should_log(step: usize, log_interval: usize, has_sink: bool) -> (bool, bool) {
    if !has_sink {
        return (false, false);
    }
    let log_interval = log_interval.max(1);
    let text_interval = (log_interval / 10).max(1);
    (step % log_interval == 0, step % text_interval == 0)
}

/// Per forward pass state shared by every task of that pass.
pub struct Context<B: AutodiffBackend> {
    /// Name of the running task, prefixes every logged key.
    pub name: String,
    pub global_step: usize,
    pub log_img: bool,
    pub log_text: bool,
    /// Last frame merged into the BEV grid.
    pub start_frame: usize,
    /// Directory for task artifacts.
    pub output: String,
    /// Per example loss weights `[BS]`.
    pub weights: Tensor<B, 1>,
    scaler: Option<Arc<dyn GradScaler<B>>>,
    sink: Option<Arc<dyn LogSink>>,
    grads: Vec<B::Gradients>,
}

impl<B: AutodiffBackend> Context<B> {
    pub fn new(global_step: usize, weights: Tensor<B, 1>) -> Self {
        Self {
            name: "<unknown>".to_string(),
            global_step,
            log_img: false,
            log_text: false,
            start_frame: 0,
            output: String::new(),
            weights,
            scaler: None,
            sink: None,
            grads: vec![],
        }
    }

    pub fn with_logging(mut self, sink: Option<Arc<dyn LogSink>>, log_img: bool, log_text: bool) -> Self {
        self.sink = sink;
        self.log_img = log_img;
        self.log_text = log_text;
        self
    }

    pub fn with_scaler(mut self, scaler: Option<Arc<dyn GradScaler<B>>>) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_output(mut self, start_frame: usize, output: impl Into<String>) -> Self {
        self.start_frame = start_frame;
        self.output = output.into();
        self
    }

    /// Reduces every loss that is part of a graph to a scalar, backpropagates
    /// their sum and replaces each of them with its detached reduced value.
    ///
    /// Losses shaped like the weights are weighted and summed, anything else
    /// is averaged. Graphless losses are left untouched.
    pub fn backward(&mut self, losses: &mut Losses<B>) {
        let mut total: Option<Tensor<B, 1>> = None;

        for loss in losses.iter_mut().filter(|l| l.is_tracked()) {
            let reduced = if loss.value.dims() == self.weights.dims() {
                (loss.value.clone() * self.weights.clone()).sum()
            } else {
                loss.value.clone().mean()
            };
            loss.consume(reduced.clone());
            total = Some(match total {
                Some(total) => total + reduced,
                None => reduced,
            });
        }

        let Some(total) = total else {
            return;
        };
        let (total, loss_scale) = match &self.scaler {
            Some(scaler) => (scaler.scale(total), scaler.factor()),
            None => (total, 1.0),
        };
        let grads = trace_span!("Backward", task = self.name.as_str(), loss_scale)
            .in_scope(|| total.backward());
        self.grads.push(grads);
    }

    /// Drains the gradients recorded by [`Context::backward`] since the last call.
    pub fn take_grads(&mut self) -> Vec<B::Gradients> {
        std::mem::take(&mut self.grads)
    }

    fn key(&self, name: &str) -> String {
        format!("{}-{name}", self.name)
    }

    pub fn add_scalar(&self, name: &str, value: f32) {
        if let Some(sink) = &self.sink {
            assert!(self.log_text, "add_scalar called while text logging is off");
            sink.add_scalar(&self.key(name), value, self.global_step);
        }
    }

    pub fn add_scalars(&self, name: &str, values: &BTreeMap<String, f32>) {
        if let Some(sink) = &self.sink {
            assert!(self.log_text, "add_scalars called while text logging is off");
            sink.add_scalars(&self.key(name), values, self.global_step);
        }
    }

    pub fn add_image(&self, name: &str, image: &DynamicImage) {
        if let Some(sink) = &self.sink {
            assert!(self.log_img, "add_image called while image logging is off");
            sink.add_image(&self.key(name), image, self.global_step);
        }
    }

    pub fn add_figure(&self, name: &str, figure: &DynamicImage) {
        if let Some(sink) = &self.sink {
            assert!(self.log_img, "add_figure called while image logging is off");
            sink.add_figure(&self.key(name), figure, self.global_step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler::StaticLossScale;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::ElementConversion;
    use std::sync::Mutex;

    type B = Autodiff<NdArray>;

    #[derive(Default)]
    struct Recorder {
        scalars: Mutex<Vec<(String, f32, usize)>>,
    }

    impl LogSink for Recorder {
        fn add_scalar(&self, key: &str, value: f32, step: usize) {
            self.scalars.lock().unwrap().push((key.to_string(), value, step));
        }
        fn add_scalars(&self, _: &str, _: &BTreeMap<String, f32>, _: usize) {}
        fn add_image(&self, _: &str, _: &DynamicImage, _: usize) {}
        fn add_figure(&self, _: &str, _: &DynamicImage, _: usize) {}
    }

    fn scalar(t: &Tensor<B, 1>) -> f32 {
        t.clone().into_scalar().elem()
    }

    #[test]
    fn per_example_losses_are_weighted() {
        let device = Default::default();
        let weights = Tensor::<B, 1>::from_floats([0.3, 0.7], &device);
        let mut ctx = Context::new(0, weights);

        let x = Tensor::<B, 1>::from_floats([2.0, 4.0], &device).require_grad();
        let mut losses = Losses::new();
        losses.insert("l", x.clone() * 1.0);
        ctx.backward(&mut losses);

        let l = losses.get("l").unwrap();
        assert!(!l.is_tracked());
        assert!((scalar(&l.value) - (0.3 * 2.0 + 0.7 * 4.0)).abs() < 1e-6);

        let mut grads = ctx.take_grads();
        assert_eq!(grads.len(), 1);
        let grad: Vec<f32> = x.grad(&grads[0]).unwrap().into_data().iter::<f32>().collect();
        assert!((grad[0] - 0.3).abs() < 1e-6 && (grad[1] - 0.7).abs() < 1e-6);
        assert!(x.grad_remove(&mut grads[0]).is_some());
        assert!(ctx.take_grads().is_empty());
    }

    #[test]
    fn mismatched_losses_are_averaged() {
        let device = Default::default();
        let mut ctx = Context::new(0, Tensor::<B, 1>::from_floats([0.3, 0.7], &device));

        let x = Tensor::<B, 1>::from_floats([1.0, 2.0, 6.0], &device).require_grad();
        let y = Tensor::<B, 1>::from_floats([5.0], &device).require_grad();
        let mut losses = Losses::new();
        losses.insert("x", x.clone() * 1.0);
        losses.insert("y", y.clone() * 1.0);
        ctx.backward(&mut losses);

        assert!((scalar(&losses.get("x").unwrap().value) - 3.0).abs() < 1e-6);
        assert!((scalar(&losses.get("y").unwrap().value) - 5.0).abs() < 1e-6);
        let grads = ctx.take_grads();
        assert_eq!(grads.len(), 1);
        let gy: f32 = y.grad(&grads[0]).unwrap().into_scalar().elem();
        assert!((gy - 1.0).abs() < 1e-6);
    }

    #[test]
    fn untracked_losses_are_a_no_op() {
        let device = Default::default();
        let mut ctx = Context::new(0, Tensor::<B, 1>::from_floats([1.0], &device));
        let mut losses = Losses::new();
        losses.insert_metric("iou", Tensor::from_floats([0.25], &device));
        ctx.backward(&mut losses);

        assert!(ctx.take_grads().is_empty());
        assert_eq!(scalar(&losses.get("iou").unwrap().value), 0.25);
    }

    #[test]
    fn graphless_losses_are_left_untouched() {
        let device = Default::default();
        let mut ctx = Context::new(0, Tensor::<B, 1>::from_floats([0.5, 0.5], &device));
        let mut losses = Losses::new();
        losses.insert("const", Tensor::from_floats([1.0, 3.0], &device));
        ctx.backward(&mut losses);

        assert!(ctx.take_grads().is_empty());
        let value = &losses.get("const").unwrap().value;
        assert_eq!(value.dims(), [2]);
        let values: Vec<f32> = value.clone().into_data().iter::<f32>().collect();
        assert_eq!(values, vec![1.0, 3.0]);

        // Only the graph carrying entry is consumed.
        let x = Tensor::<B, 1>::from_floats([2.0, 4.0], &device).require_grad();
        losses.insert("l", x * 1.0);
        ctx.backward(&mut losses);
        assert_eq!(ctx.take_grads().len(), 1);
        assert!((scalar(&losses.get("l").unwrap().value) - 3.0).abs() < 1e-6);
        assert_eq!(losses.get("const").unwrap().value.dims(), [2]);
    }

    #[test]
    fn scaler_multiplies_gradients() {
        let device = Default::default();
        let scaler: Arc<dyn GradScaler<B>> = Arc::new(StaticLossScale::new(8.0));
        let factor = scaler.factor();
        let mut ctx = Context::new(0, Tensor::<B, 1>::from_floats([1.0], &device))
            .with_scaler(Some(scaler));
        let x = Tensor::<B, 1>::from_floats([3.0], &device).require_grad();
        let mut losses = Losses::new();
        losses.insert("x", x.clone() * 2.0);
        ctx.backward(&mut losses);

        // The reported loss stays unscaled.
        assert!((scalar(&losses.get("x").unwrap().value) - 6.0).abs() < 1e-6);
        let grads = ctx.take_grads();
        let gx: f32 = x.grad(&grads[0]).unwrap().into_scalar().elem();
        assert_eq!(factor, 8.0);
        assert!((gx - 2.0 * factor).abs() < 1e-5);
    }

    #[test]
    fn logging_keys_are_scoped() {
        let device = Default::default();
        let sink = Arc::new(Recorder::default());
        let mut ctx = Context::<B>::new(7, Tensor::from_floats([1.0], &device))
            .with_logging(Some(sink.clone() as Arc<dyn LogSink>), false, true);
        ctx.name = "det".to_string();
        ctx.add_scalar("iou", 0.5);

        assert_eq!(*sink.scalars.lock().unwrap(), vec![("det-iou".to_string(), 0.5, 7)]);
    }

    #[test]
    #[should_panic(expected = "text logging is off")]
    fn logging_with_closed_gate_panics() {
        let device = Default::default();
        let sink: Arc<dyn LogSink> = Arc::new(Recorder::default());
        let ctx = Context::<B>::new(1, Tensor::from_floats([1.0], &device))
            .with_logging(Some(sink), true, false);
        ctx.add_scalar("loss", 1.0);
    }

    #[test]
    fn logging_without_sink_is_a_no_op() {
        let device = Default::default();
        let ctx = Context::<B>::new(1, Tensor::from_floats([1.0], &device));
        ctx.add_scalar("loss", 1.0);
        ctx.add_image("img", &DynamicImage::new_rgb8(1, 1));
    }

    #[test]
    fn log_intervals() {
        assert_eq!(should_log(1000, 500, false), (false, false));
        assert_eq!(should_log(1000, 500, true), (true, true));
        assert_eq!(should_log(1050, 500, true), (false, true));
        assert_eq!(should_log(1051, 500, true), (false, false));
        assert_eq!(should_log(3, 5, true), (false, true));
    }
}
