//! Experiment configuration shared by the dataset pipeline and the detector.
//!
//! Read once from `configs/experiment.toml` under the model root. Every
//! section has defaults, so a partial file only overrides what it names.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default probability cutoff for emitted detections (inclusive).
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.2;

/// Top-level experiment configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Detector hyperparameters.
    pub model: ModelConfig,
    /// Predict-mode dataset options.
    pub dataset: DatasetConfig,
    /// Postprocessing options.
    pub predict: PredictConfig,
}

/// Detector hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Registered model name.
    pub name: String,
    /// Input channels; the dataset always produces 3.
    pub in_channels: usize,
    /// Output channels of each stride-2 backbone stage.
    pub stages: Vec<usize>,
    /// Number of trailing stages carrying detection heads.
    pub head_levels: usize,
    /// Number of foreground classes.
    pub num_classes: usize,
    /// Anchor side length in units of the level stride.
    pub anchor_base: f32,
    /// Anchor scale multipliers per location.
    pub anchor_scales: Vec<f32>,
    /// Anchor height/width ratios per location.
    pub anchor_ratios: Vec<f32>,
    /// Standard deviations applied to regressed `(dx, dy, dw, dh)`.
    pub target_stds: [f32; 4],
    /// Candidates scoring below this are dropped before NMS.
    pub score_floor: f32,
    /// IoU above which the lower-scoring box is suppressed.
    pub nms_iou: f32,
    /// Maximum rows returned per image.
    pub max_detections: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "anchor_detector".to_string(),
            in_channels: 3,
            stages: vec![32, 64, 128, 256],
            head_levels: 2,
            num_classes: 1,
            anchor_base: 4.0,
            anchor_scales: vec![1.0, 1.26, 1.587],
            anchor_ratios: vec![0.5, 1.0, 2.0],
            target_stds: [1.0; 4],
            score_floor: 0.05,
            nms_iou: 0.5,
            max_detections: 100,
        }
    }
}

impl ModelConfig {
    /// Anchors generated per feature map location.
    #[must_use]
    pub fn anchors_per_location(&self) -> usize {
        self.anchor_scales.len() * self.anchor_ratios.len()
    }
}

/// Predict-mode dataset options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Directory image filenames are resolved against.
    ///
    /// Replaced at runtime with the directory holding temporary images.
    pub data_dir: PathBuf,
    /// Target size `[long_edge, short_edge]`, or `[width, height]` without
    /// `keep_ratio`.
    pub img_scale: [u32; 2],
    /// Preserve the aspect ratio when resizing.
    pub keep_ratio: bool,
    /// Per-channel mean (RGB, 0-255 scale).
    pub mean: [f32; 3],
    /// Per-channel standard deviation (RGB, 0-255 scale).
    pub std: [f32; 3],
    /// Padded height and width are multiples of this.
    pub size_divisor: u32,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            img_scale: [512, 512],
            keep_ratio: true,
            mean: [123.675, 116.28, 103.53],
            std: [58.395, 57.12, 57.375],
            size_divisor: 32,
        }
    }
}

/// Postprocessing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictConfig {
    /// Detections with probability at or above this are emitted.
    pub score_threshold: f32,
    /// Expected SHA-256 of the checkpoint, verified at load when set.
    pub checkpoint_sha256: Option<String>,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            checkpoint_sha256: None,
        }
    }
}

impl ExperimentConfig {
    /// Reads and validates a TOML experiment config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, is not valid TOML, or fails
    /// validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading experiment config from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parses and validates a TOML experiment config.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that values are usable by the dataset and detector.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        if model.in_channels != 3 {
            anyhow::bail!("model.in_channels must be 3, got {}", model.in_channels);
        }
        if model.stages.is_empty() || model.stages.contains(&0) {
            anyhow::bail!("model.stages must be non-empty and non-zero");
        }
        if model.head_levels == 0 || model.head_levels > model.stages.len() {
            anyhow::bail!(
                "model.head_levels must be 1..={}, got {}",
                model.stages.len(),
                model.head_levels
            );
        }
        if model.num_classes == 0 {
            anyhow::bail!("model.num_classes must be at least 1");
        }
        if model.anchors_per_location() == 0 {
            anyhow::bail!("model.anchor_scales and model.anchor_ratios must be non-empty");
        }
        if model
            .anchor_scales
            .iter()
            .chain(&model.anchor_ratios)
            .any(|v| !v.is_finite() || *v <= 0.0)
        {
            anyhow::bail!("model anchor scales and ratios must be positive");
        }
        if !(0.0..=1.0).contains(&model.nms_iou) {
            anyhow::bail!("model.nms_iou must be 0.0-1.0, got {}", model.nms_iou);
        }

        let dataset = &self.dataset;
        if dataset.img_scale.contains(&0) {
            anyhow::bail!("dataset.img_scale must be non-zero");
        }
        if dataset.size_divisor == 0 {
            anyhow::bail!("dataset.size_divisor must be non-zero");
        }
        if dataset.std.iter().any(|s| *s == 0.0) {
            anyhow::bail!("dataset.std must be non-zero");
        }

        let t = self.predict.score_threshold;
        if !(0.0..=1.0).contains(&t) {
            anyhow::bail!("predict.score_threshold must be 0.0-1.0, got {t}");
        }

        Ok(())
    }
}

/// Fixed layout of a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    /// Experiment config file.
    pub config: PathBuf,
    /// Safetensors checkpoint.
    pub weights: PathBuf,
}

impl ModelPaths {
    /// Config path relative to the model root.
    pub const CONFIG_FILE: &'static str = "configs/experiment.toml";
    /// Checkpoint path relative to the model root.
    pub const WEIGHTS_FILE: &'static str = "checkpoints/experiment.safetensors";

    /// Resolves the fixed layout under `root`.
    #[must_use]
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            config: root.join(Self::CONFIG_FILE),
            weights: root.join(Self::WEIGHTS_FILE),
        }
    }
}
