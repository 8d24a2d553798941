use burn::prelude::{Backend, Tensor};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::error::{Result, VanError};

const LOW_QUANTILE: f32 = 0.001;
const HIGH_QUANTILE: f32 = 0.99;

/// Linear interpolation between the closest ranks of a sorted slice.
fn quantile(sorted: &[f32], q: f32) -> f32 {
    let pos = q * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - lo as f32;
    sorted[lo] * (1.0 - t) + sorted[hi] * t
}

/// Maps every channel of a `[C, H, W]` tensor from its 0.1% / 99% quantile
/// range to [0, 1] and converts it to an 8 bit image for logging.
pub fn normalize_img<B: Backend>(img: Tensor<B, 3>) -> Result<DynamicImage> {
    let [c, h, w] = img.dims();
    if !matches!(c, 1 | 3 | 4) {
        return Err(VanError::ImageChannels(c));
    }

    let data: Vec<f32> = img.into_data().iter::<f32>().collect();
    let plane = h * w;
    let mut pixels = vec![0u8; c * plane];

    for ch in 0..c {
        let values = &data[ch * plane..(ch + 1) * plane];
        if values.is_empty() {
            continue;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f32::total_cmp);
        let min = quantile(&sorted, LOW_QUANTILE);
        let max = quantile(&sorted, HIGH_QUANTILE);
        let range = (max - min).max(f32::EPSILON);

        for (i, v) in values.iter().enumerate() {
            let norm = ((v - min) / range).clamp(0.0, 1.0);
            pixels[i * c + ch] = (norm * 255.0).round() as u8;
        }
    }

    let (w, h) = (w as u32, h as u32);
    let img = match c {
        1 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        _ => RgbaImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgba8),
    };
    Ok(img.expect("Pixel buffer is sized to the image"))
}
