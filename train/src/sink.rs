use std::collections::BTreeMap;
use std::path::PathBuf;

use image::DynamicImage;

/// Receives logging records keyed by `<task>-<metric>` at a global step.
pub trait LogSink: Send + Sync {
    fn add_scalar(&self, key: &str, value: f32, step: usize);
    fn add_scalars(&self, key: &str, values: &BTreeMap<String, f32>, step: usize);
    fn add_image(&self, key: &str, image: &DynamicImage, step: usize);
    /// A rendered plot.
    fn add_figure(&self, key: &str, figure: &DynamicImage, step: usize);
}

/// Emits scalars as `tracing` events and, when an image directory is set,
/// writes images and figures to `<dir>/<key>_<step>.png`.
#[derive(Clone, Debug, Default)]
pub struct TracingSink {
    image_dir: Option<PathBuf>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    fn image_path(&self, key: &str, step: usize) -> Option<PathBuf> {
        self.image_dir
            .as_ref()
            .map(|dir| dir.join(format!("{key}_{step}.png")))
    }

    fn save(&self, key: &str, image: &DynamicImage, step: usize) {
        let Some(path) = self.image_path(key, step) else {
            tracing::info!(step, key, width = image.width(), height = image.height(), "image");
            return;
        };
        let saved = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .map_err(image::ImageError::IoError)
            .and_then(|_| image.save(&path));
        match saved {
            Ok(()) => tracing::info!(step, key, ?path, "saved image"),
            Err(err) => tracing::warn!(step, key, ?path, %err, "failed to save image"),
        }
    }
}

impl LogSink for TracingSink {
    fn add_scalar(&self, key: &str, value: f32, step: usize) {
        tracing::info!(step, key, value, "scalar");
    }

    fn add_scalars(&self, key: &str, values: &BTreeMap<String, f32>, step: usize) {
        let values: Vec<_> = values.iter().map(|(k, v)| format!("{k}={v:.4}")).collect();
        tracing::info!(step, key, values = %values.join(", "), "scalars");
    }

    fn add_image(&self, key: &str, image: &DynamicImage, step: usize) {
        self.save(key, image, step);
    }

    fn add_figure(&self, key: &str, figure: &DynamicImage, step: usize) {
        self.save(key, figure, step);
    }
}
