//! Host side helpers for batched 4x4 homogeneous transforms.
//!
//! Tensors store matrices row-major as `[N, 4, 4]`; glam stores them column
//! major, hence the transposes on the way in and out.

use burn::prelude::{Backend, Tensor, TensorData};
use glam::Mat4;

/// Reads a `[N, 4, 4]` tensor back to the host.
pub fn to_host<B: Backend>(poses: Tensor<B, 3>) -> Vec<Mat4> {
    let values: Vec<f32> = poses.into_data().iter::<f32>().collect();
    values
        .chunks_exact(16)
        .map(|rows| Mat4::from_cols_slice(rows).transpose())
        .collect()
}

/// Builds a `[N, 4, 4]` tensor from host matrices.
pub fn from_host<B: Backend>(mats: &[Mat4], device: &B::Device) -> Tensor<B, 3> {
    let values: Vec<f32> = mats
        .iter()
        .flat_map(|m| m.transpose().to_cols_array())
        .collect();
    Tensor::from_data(TensorData::new(values, [mats.len(), 4, 4]), device)
}

/// Inverts every matrix of a `[N, 4, 4]` tensor.
pub fn invert<B: Backend>(poses: Tensor<B, 3>) -> Tensor<B, 3> {
    let device = poses.device();
    let inverted: Vec<Mat4> = to_host(poses).iter().map(Mat4::inverse).collect();
    from_host(&inverted, &device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use glam::Vec3;

    type B = NdArray;

    #[test]
    fn host_round_trip_keeps_row_major_layout() {
        let device = Default::default();
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let tensor = from_host::<B>(&[m], &device);

        // The translation lives in the last column of a row-major matrix.
        let values: Vec<f32> = tensor.clone().into_data().iter::<f32>().collect();
        assert_eq!(values[3], 1.0);
        assert_eq!(values[7], 2.0);
        assert_eq!(values[11], 3.0);

        assert_eq!(to_host(tensor), vec![m]);
    }

    #[test]
    fn invert_undoes_transform() {
        let device = Default::default();
        let m = Mat4::from_rotation_z(0.7) * Mat4::from_translation(Vec3::new(4.0, -1.0, 0.5));
        let inv = invert(from_host::<B>(&[m], &device));
        let product = to_host(inv)[0] * m;
        assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }
}
