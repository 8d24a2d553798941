use burn::prelude::Tensor;
use burn::tensor::backend::AutodiffBackend;

/// Scales the aggregate loss before backward so small gradients survive
/// reduced precision. Gradients come out multiplied by [`GradScaler::factor`].
pub trait GradScaler<B: AutodiffBackend>: Send + Sync {
    fn scale(&self, loss: Tensor<B, 1>) -> Tensor<B, 1>;
    fn factor(&self) -> f32;
}

/// Multiplies every loss by the same constant.
#[derive(Clone, Copy, Debug)]
pub struct StaticLossScale {
    factor: f32,
}

impl StaticLossScale {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl<B: AutodiffBackend> GradScaler<B> for StaticLossScale {
    fn scale(&self, loss: Tensor<B, 1>) -> Tensor<B, 1> {
        loss.mul_scalar(self.factor)
    }

    fn factor(&self) -> f32 {
        self.factor
    }
}
