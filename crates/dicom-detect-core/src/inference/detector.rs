//! Single-shot anchor-based detector.
//!
//! A stride-2 convolutional backbone with classification and box regression
//! heads on its last few stages, in the style of RetinaNet without the
//! feature pyramid. Weights come from a safetensors checkpoint whose tensor
//! names match [`parameter_shapes`].

// Allow common ML code patterns
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use candle_core::{Device, Module, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder};
use tracing::debug;

use super::{nms, sigmoid, Candidate};
use crate::config::ModelConfig;
use crate::dataset::ImageMeta;
use crate::domain::DetectionRow;
use crate::ports::Detector;

/// Registered name of [`AnchorDetector`].
pub const ANCHOR_DETECTOR: &str = "anchor_detector";

/// Largest magnitude of a regressed log-scale delta, `ln(1000 / 16)`.
const MAX_LOG_RATIO: f32 = 4.135_166_6;

/// Builds the detector named by `config.name`.
///
/// # Errors
///
/// Returns an error for an unknown model name or if weights are missing or
/// misshapen.
pub fn build_detector(config: &ModelConfig, vb: VarBuilder) -> Result<Box<dyn Detector>> {
    match config.name.as_str() {
        ANCHOR_DETECTOR => Ok(Box::new(AnchorDetector::new(config, vb)?)),
        other => anyhow::bail!("Unknown model: {other}"),
    }
}

/// Names and shapes of every parameter [`AnchorDetector`] loads.
#[must_use]
pub fn parameter_shapes(config: &ModelConfig) -> Vec<(String, Vec<usize>)> {
    let mut params = Vec::new();

    let mut in_channels = config.in_channels;
    for (i, &out_channels) in config.stages.iter().enumerate() {
        params.push((
            format!("stages.{i}.conv1.weight"),
            vec![out_channels, in_channels, 3, 3],
        ));
        params.push((format!("stages.{i}.conv1.bias"), vec![out_channels]));
        params.push((
            format!("stages.{i}.conv2.weight"),
            vec![out_channels, out_channels, 3, 3],
        ));
        params.push((format!("stages.{i}.conv2.bias"), vec![out_channels]));
        in_channels = out_channels;
    }

    let anchors = config.anchors_per_location();
    let first = config.stages.len().saturating_sub(config.head_levels);
    for (j, &channels) in config.stages[first..].iter().enumerate() {
        let cls_out = anchors * config.num_classes;
        params.push((
            format!("heads.{j}.classifier.weight"),
            vec![cls_out, channels, 1, 1],
        ));
        params.push((format!("heads.{j}.classifier.bias"), vec![cls_out]));
        params.push((
            format!("heads.{j}.regressor.weight"),
            vec![anchors * 4, channels, 1, 1],
        ));
        params.push((format!("heads.{j}.regressor.bias"), vec![anchors * 4]));
    }

    params
}

/// Backbone stage: stride-2 conv, stride-1 conv, each followed by ReLU.
struct Stage {
    conv1: Conv2d,
    conv2: Conv2d,
}

impl Stage {
    fn new(in_channels: usize, out_channels: usize, vb: &VarBuilder) -> Result<Self> {
        let conv1 = conv2d(
            in_channels,
            out_channels,
            3,
            Conv2dConfig {
                stride: 2,
                padding: 1,
                ..Conv2dConfig::default()
            },
            vb.pp("conv1"),
        )?;
        let conv2 = conv2d(
            out_channels,
            out_channels,
            3,
            Conv2dConfig {
                padding: 1,
                ..Conv2dConfig::default()
            },
            vb.pp("conv2"),
        )?;
        Ok(Self { conv1, conv2 })
    }
}

impl Module for Stage {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.conv1.forward(x)?.relu()?;
        self.conv2.forward(&h)?.relu()
    }
}

/// Detection head attached to one backbone stage.
struct Head {
    classifier: Conv2d,
    regressor: Conv2d,
    stride: usize,
}

/// Raw head outputs for one level, flattened to one row per anchor.
struct LevelOutput {
    scores: Vec<Vec<f32>>,
    deltas: Vec<Vec<f32>>,
    height: usize,
    width: usize,
    stride: usize,
}

/// Anchor-based single-shot detector.
pub struct AnchorDetector {
    stages: Vec<Stage>,
    heads: Vec<Head>,
    config: ModelConfig,
    device: Device,
}

impl AnchorDetector {
    /// Creates the detector, resolving every parameter by name from `vb`.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is missing or has the wrong shape.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let device = vb.device().clone();

        let mut stages = Vec::with_capacity(config.stages.len());
        let mut in_channels = config.in_channels;
        for (i, &out_channels) in config.stages.iter().enumerate() {
            let stage = Stage::new(in_channels, out_channels, &vb.pp(format!("stages.{i}")))
                .with_context(|| format!("Failed to load backbone stage {i}"))?;
            stages.push(stage);
            in_channels = out_channels;
        }

        let anchors = config.anchors_per_location();
        let first = config.stages.len().saturating_sub(config.head_levels);
        let mut heads = Vec::with_capacity(config.head_levels);
        for (j, &channels) in config.stages[first..].iter().enumerate() {
            let hb = vb.pp(format!("heads.{j}"));
            let classifier = conv2d(
                channels,
                anchors * config.num_classes,
                1,
                Conv2dConfig::default(),
                hb.pp("classifier"),
            )
            .with_context(|| format!("Failed to load classifier of head {j}"))?;
            let regressor = conv2d(
                channels,
                anchors * 4,
                1,
                Conv2dConfig::default(),
                hb.pp("regressor"),
            )
            .with_context(|| format!("Failed to load regressor of head {j}"))?;

            heads.push(Head {
                classifier,
                regressor,
                stride: 1 << (first + j + 1),
            });
        }

        debug!(
            "Built {} with {} stages and {} heads",
            ANCHOR_DETECTOR,
            stages.len(),
            heads.len()
        );

        Ok(Self {
            stages,
            heads,
            config: config.clone(),
            device,
        })
    }

    /// Runs the backbone and heads.
    fn forward(&self, x: &Tensor) -> Result<Vec<LevelOutput>> {
        let anchors = self.config.anchors_per_location();
        let classes = self.config.num_classes;

        let mut features = Vec::with_capacity(self.stages.len());
        let mut h = x.clone();
        for stage in &self.stages {
            h = stage.forward(&h)?;
            features.push(h.clone());
        }

        let first = self.stages.len() - self.heads.len();
        let mut outputs = Vec::with_capacity(self.heads.len());
        for (head, feature) in self.heads.iter().zip(&features[first..]) {
            let (_, _, height, width) = feature.dims4()?;
            let rows = height * width * anchors;

            // (1, A*K, H, W) -> (H*W*A, K), row order: y, x, anchor
            let scores = head
                .classifier
                .forward(feature)?
                .permute((0, 2, 3, 1))?
                .reshape((rows, classes))?
                .to_vec2::<f32>()?;

            let deltas = head
                .regressor
                .forward(feature)?
                .permute((0, 2, 3, 1))?
                .reshape((rows, 4))?
                .to_vec2::<f32>()?;

            outputs.push(LevelOutput {
                scores,
                deltas,
                height,
                width,
                stride: head.stride,
            });
        }

        Ok(outputs)
    }

    /// Anchors `[cx, cy, w, h]` of one level in input pixels, in head row order.
    fn anchors(&self, height: usize, width: usize, stride: usize) -> Vec<[f32; 4]> {
        let stride_f = stride as f32;
        let mut anchors = Vec::with_capacity(height * width * self.config.anchors_per_location());

        for y in 0..height {
            for x in 0..width {
                let cx = (x as f32 + 0.5) * stride_f;
                let cy = (y as f32 + 0.5) * stride_f;
                for ratio in &self.config.anchor_ratios {
                    let h_ratio = ratio.sqrt();
                    for scale in &self.config.anchor_scales {
                        let base = self.config.anchor_base * stride_f * scale;
                        anchors.push([cx, cy, base / h_ratio, base * h_ratio]);
                    }
                }
            }
        }

        anchors
    }

    /// Applies regressed deltas to an anchor, returning a corner-format box.
    fn decode_box(&self, anchor: &[f32; 4], delta: &[f32]) -> [f32; 4] {
        let stds = self.config.target_stds;
        let [cx, cy, w, h] = *anchor;

        let dx = delta[0] * stds[0];
        let dy = delta[1] * stds[1];
        let dw = (delta[2] * stds[2]).clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO);
        let dh = (delta[3] * stds[3]).clamp(-MAX_LOG_RATIO, MAX_LOG_RATIO);

        let pcx = cx + dx * w;
        let pcy = cy + dy * h;
        let pw = w * dw.exp();
        let ph = h * dh.exp();

        [pcx - pw / 2.0, pcy - ph / 2.0, pcx + pw / 2.0, pcy + ph / 2.0]
    }
}

impl Detector for AnchorDetector {
    fn name(&self) -> &'static str {
        ANCHOR_DETECTOR
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn detect(&self, batch: &Tensor, meta: &ImageMeta) -> Result<Vec<DetectionRow>> {
        let (n, _, _, _) = batch.dims4().context("Expected a (1, 3, H, W) batch")?;
        if n != 1 {
            anyhow::bail!("Expected a batch of one image, got {n}");
        }

        let batch = batch.to_device(&self.device)?;
        let levels = self.forward(&batch).context("Forward pass failed")?;

        let (img_h, img_w) = (meta.img_shape.0 as f32, meta.img_shape.1 as f32);
        let mut candidates = Vec::new();

        for level in &levels {
            let anchors = self.anchors(level.height, level.width, level.stride);
            for ((anchor, logits), delta) in anchors.iter().zip(&level.scores).zip(&level.deltas) {
                let score = logits
                    .iter()
                    .map(|l| sigmoid(*l))
                    .fold(f32::NEG_INFINITY, f32::max);

                if score < self.config.score_floor {
                    continue;
                }

                let [x1, y1, x2, y2] = self.decode_box(anchor, delta);
                candidates.push(Candidate {
                    bbox: [
                        x1.clamp(0.0, img_w),
                        y1.clamp(0.0, img_h),
                        x2.clamp(0.0, img_w),
                        y2.clamp(0.0, img_h),
                    ],
                    score,
                });
            }
        }

        debug!("{} candidates above score floor", candidates.len());

        let kept = nms(candidates, self.config.nms_iou, self.config.max_detections);
        let [sx, sy] = meta.scale_factor;

        Ok(kept
            .into_iter()
            .map(|c| {
                let [x1, y1, x2, y2] = c.bbox;
                [x1 / sx, x2 / sx, y1 / sy, y2 / sy, c.score]
            })
            .collect())
    }
}
