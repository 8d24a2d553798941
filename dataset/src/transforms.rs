use burn::prelude::{Backend, Tensor};
use glam::{Mat4, Vec3};
use rand::Rng;

use crate::batch::{Batch, PackedPoses};
use crate::pose;

/// A pure rewrite of a batch, used for pose normalization and augmentation.
pub trait BatchTransform<B: Backend>: Send + Sync {
    fn apply(&self, batch: Batch<B>) -> Batch<B>;
}

/// Returns the batch unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<B: Backend> BatchTransform<B> for Identity {
    fn apply(&self, batch: Batch<B>) -> Batch<B> {
        batch
    }
}

/// Applies transforms in order, feeding each output to the next.
pub struct Compose<B: Backend> {
    transforms: Vec<Box<dyn BatchTransform<B>>>,
}

impl<B: Backend> Compose<B> {
    pub fn new(transforms: Vec<Box<dyn BatchTransform<B>>>) -> Self {
        Self { transforms }
    }
}

impl<B: Backend> BatchTransform<B> for Compose<B> {
    fn apply(&self, batch: Batch<B>) -> Batch<B> {
        self.transforms
            .iter()
            .fold(batch, |batch, transform| transform.apply(batch))
    }
}

/// Left multiplies every frame pose, short and long horizon, by one `[BS, 4, 4]`
/// matrix per example.
fn left_multiply<B: Backend>(batch: Batch<B>, per_example: Tensor<B, 3>) -> Batch<B> {
    let frames = batch.num_frames();
    let long_len = batch.long_cam_t.max_len();
    let per_example = per_example.unsqueeze_dim::<4>(1);

    let cam_t = per_example.clone().repeat_dim(1, frames).matmul(batch.cam_t);
    let poses = per_example
        .repeat_dim(1, long_len)
        .matmul(batch.long_cam_t.poses);

    Batch {
        cam_t,
        long_cam_t: PackedPoses {
            poses,
            ..batch.long_cam_t
        },
        ..batch
    }
}

/// Re-anchors all poses so the car pose at `start_frame` becomes the identity.
///
/// Apply this once, before any rotation or translation augmentation.
#[derive(Clone, Copy, Debug)]
pub struct NormalizeCarPosition {
    pub start_frame: usize,
}

impl NormalizeCarPosition {
    pub fn new(start_frame: usize) -> Self {
        Self { start_frame }
    }
}

impl<B: Backend> BatchTransform<B> for NormalizeCarPosition {
    fn apply(&self, batch: Batch<B>) -> Batch<B> {
        let inv_start = pose::invert(batch.world_to_car(self.start_frame));
        left_multiply(batch, inv_start)
    }
}

/// Applies one random rotation around the z axis per example, shared by
/// every frame of that example.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomRotation;

impl<B: Backend> BatchTransform<B> for RandomRotation {
    fn apply(&self, batch: Batch<B>) -> Batch<B> {
        let mut rng = rand::rng();
        let rotations: Vec<Mat4> = (0..batch.batch_size())
            .map(|_| Mat4::from_rotation_z(rng.random_range(0.0..std::f32::consts::TAU)))
            .collect();
        let rotations = pose::from_host(&rotations, &batch.device());
        left_multiply(batch, rotations)
    }
}

/// Applies one random translation per example, uniform within `±distances`
/// on each axis and shared by every frame of that example.
#[derive(Clone, Copy, Debug)]
pub struct RandomTranslation {
    pub distances: Vec3,
}

impl RandomTranslation {
    pub fn new(distances: Vec3) -> Self {
        Self { distances }
    }
}

impl<B: Backend> BatchTransform<B> for RandomTranslation {
    fn apply(&self, batch: Batch<B>) -> Batch<B> {
        let mut rng = rand::rng();
        let d = self.distances.abs();
        let translations: Vec<Mat4> = (0..batch.batch_size())
            .map(|_| {
                Mat4::from_translation(Vec3::new(
                    rng.random_range(-d.x..=d.x),
                    rng.random_range(-d.y..=d.y),
                    rng.random_range(-d.z..=d.z),
                ))
            })
            .collect();
        let translations = pose::from_host(&translations, &batch.device());
        left_multiply(batch, translations)
    }
}
