//! Predict-mode dataset: loads annotated image files and applies the
//! training-time preprocessing.
//!
//! Pipeline per sample: load file → 8-bit RGB → resize → normalize → pad to
//! `size_divisor` → CHW tensor.

// Allow common image/tensor code patterns
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use tracing::debug;

use crate::config::DatasetConfig;

/// One entry to load, relative to `data_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// File name inside the data directory.
    pub filename: String,
    /// Expected image height.
    pub height: u32,
    /// Expected image width.
    pub width: u32,
}

/// Geometry of a preprocessed sample, needed to map boxes back.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
    /// Resolved path of the loaded file.
    pub filename: PathBuf,
    /// Original `(height, width)`.
    pub ori_shape: (u32, u32),
    /// Resized `(height, width)` before padding.
    pub img_shape: (u32, u32),
    /// Padded `(height, width)`; the tensor's spatial size.
    pub pad_shape: (u32, u32),
    /// `[width_scale, height_scale]` from original to resized.
    pub scale_factor: [f32; 2],
}

/// A preprocessed image and its metadata.
#[derive(Debug, Clone)]
pub struct Sample {
    /// `(3, H, W)` normalized tensor.
    pub img: Tensor,
    /// Geometry of `img`.
    pub meta: ImageMeta,
}

/// Dataset over a list of annotations, used in predict mode only.
pub struct PredictDataset<'a> {
    config: &'a DatasetConfig,
    annotations: Vec<Annotation>,
    device: Device,
}

impl<'a> PredictDataset<'a> {
    /// Creates a dataset producing tensors on `device`.
    #[must_use]
    pub fn new(config: &'a DatasetConfig, annotations: Vec<Annotation>, device: &Device) -> Self {
        Self {
            config,
            annotations,
            device: device.clone(),
        }
    }

    /// Number of annotations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    /// Returns true if there are no annotations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Loads and preprocesses the sample at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range, the file cannot be
    /// decoded, its size disagrees with the annotation, or tensor creation
    /// fails.
    pub fn get(&self, index: usize) -> Result<Sample> {
        let ann = self.annotations.get(index).ok_or_else(|| {
            anyhow::anyhow!(
                "Index {index} out of range for {} annotations",
                self.annotations.len()
            )
        })?;

        let path = self.config.data_dir.join(&ann.filename);
        debug!("Loading sample {}", path.display());

        let image = image::open(&path)
            .with_context(|| format!("Failed to open image: {}", path.display()))?
            .to_rgb8();

        let (width, height) = image.dimensions();
        if (width, height) != (ann.width, ann.height) {
            anyhow::bail!(
                "Image {} is {width}x{height}, annotation says {}x{}",
                path.display(),
                ann.width,
                ann.height
            );
        }

        let (new_w, new_h) = rescale_size(width, height, self.config.img_scale, self.config.keep_ratio);
        let resized = image::imageops::resize(&image, new_w, new_h, FilterType::Triangle);

        let divisor = self.config.size_divisor;
        let pad_w = new_w.div_ceil(divisor) * divisor;
        let pad_h = new_h.div_ceil(divisor) * divisor;

        let plane = (pad_w * pad_h) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        let (mean, std) = (self.config.mean, self.config.std);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = (y * pad_w + x) as usize;
            for c in 0..3 {
                data[c * plane + offset] = (f32::from(pixel[c]) - mean[c]) / std[c];
            }
        }

        let img = Tensor::from_vec(data, (3, pad_h as usize, pad_w as usize), &self.device)
            .context("Failed to create input tensor")?;

        Ok(Sample {
            img,
            meta: ImageMeta {
                filename: path,
                ori_shape: (height, width),
                img_shape: (new_h, new_w),
                pad_shape: (pad_h, pad_w),
                scale_factor: [new_w as f32 / width as f32, new_h as f32 / height as f32],
            },
        })
    }
}

/// Computes the resized `(width, height)`.
///
/// With `keep_ratio`, the image is scaled by
/// `min(long / max(w, h), short / min(w, h))` and rounded half up; otherwise
/// it is resized to `scale` as `[width, height]` exactly.
fn rescale_size(width: u32, height: u32, scale: [u32; 2], keep_ratio: bool) -> (u32, u32) {
    if !keep_ratio {
        return (scale[0], scale[1]);
    }

    let long_edge = scale[0].max(scale[1]) as f32;
    let short_edge = scale[0].min(scale[1]) as f32;
    let factor = (long_edge / width.max(height) as f32).min(short_edge / width.min(height) as f32);

    let new_w = ((width as f32 * factor) + 0.5) as u32;
    let new_h = ((height as f32 * factor) + 0.5) as u32;
    (new_w.max(1), new_h.max(1))
}
