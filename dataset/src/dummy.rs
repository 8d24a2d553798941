use std::collections::BTreeMap;

use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::Distribution;
use glam::{Mat4, Quat, Vec3};
use rand::Rng;

use crate::batch::{Batch, PackedPoses};
use crate::collate::collate;
use crate::pose;

const DUMMY_CAMERAS: [&str; 2] = ["left", "right"];

fn random_rigid(rng: &mut impl Rng, count: usize) -> Vec<Mat4> {
    (0..count)
        .map(|_| {
            Mat4::from_rotation_translation(
                Quat::from_rotation_z(rng.random_range(0.0..std::f32::consts::TAU)),
                Vec3::new(
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-1.0..1.0),
                ),
            )
        })
        .collect()
}

/// A random single example with `frames` frames and a `long_len` long
/// horizon pose sequence, two cameras at 48x64.
pub fn dummy_item_with<B: Backend>(frames: usize, long_len: usize, device: &B::Device) -> Batch<B> {
    let mut rng = rand::rng();

    let poses = random_rigid(&mut rng, frames.max(long_len));
    let long_cam_t = PackedPoses::from_sequence(pose::from_host(&poses[..long_len], device));
    let cam_t = pose::from_host(&poses[..frames], device).unsqueeze();
    let frame_t = pose::from_host(&random_rigid(&mut rng, frames), device).unsqueeze();

    let mut intrinsics = BTreeMap::new();
    let mut extrinsics = BTreeMap::new();
    let mut color = BTreeMap::new();
    let mut mask = BTreeMap::new();
    for cam in DUMMY_CAMERAS {
        let cam = cam.to_string();
        intrinsics.insert(cam.clone(), Tensor::random([1, 4, 4], Distribution::Default, device));
        extrinsics.insert(cam.clone(), pose::from_host(&random_rigid(&mut rng, 1), device));
        color.insert(
            cam.clone(),
            Tensor::random([1, frames, 3, 48, 64], Distribution::Default, device),
        );
        mask.insert(cam, Tensor::random([1, 1, 48, 64], Distribution::Default, device));
    }

    Batch {
        weight: Tensor::random([1], Distribution::Default, device),
        distances: Tensor::random([1, frames], Distribution::Default, device),
        cam_t,
        frame_t,
        frame_time: Tensor::<B, 1, Int>::arange(0..frames as i64, device)
            .float()
            .unsqueeze(),
        intrinsics,
        extrinsics,
        color,
        mask,
        long_cam_t,
        global_batch_size: 1,
    }
}

/// A random single example with 3 frames and 27 long horizon poses.
pub fn dummy_item<B: Backend>(device: &B::Device) -> Batch<B> {
    dummy_item_with(3, 27, device)
}

/// Two collated dummy examples.
pub fn dummy_batch<B: Backend>(device: &B::Device) -> Batch<B> {
    let items = vec![Some(dummy_item(device)), Some(dummy_item(device))];
    collate(items, true)
        .ok()
        .flatten()
        .expect("Two valid dummy examples always collate")
}
