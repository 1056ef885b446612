//! Synthetic DICOM files and model directories for testing.

// Allow common image code patterns
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use safetensors::tensor::TensorView;

use dicom_detect_core::domain::{TAG_SERIES_UID, TAG_SOP_UID, TAG_STUDY_UID};
use dicom_detect_core::inference::parameter_shapes;
use dicom_detect_core::{ExperimentConfig, Instance, ModelPaths};

/// Pixel payload of a synthetic file.
#[derive(Debug, Clone)]
enum Pixels {
    Gray8(Vec<u8>),
    Gray16(Vec<u16>),
    Rgb8(Vec<u8>),
}

/// Builder for synthetic DICOM Part 10 files.
///
/// Produces secondary-capture images in explicit VR little endian with a
/// diagonal gradient, so decoding yields non-uniform pixel data.
#[derive(Debug, Clone)]
pub struct DicomBuilder {
    width: u32,
    height: u32,
    pixels: Pixels,
    study_uid: Option<String>,
    series_uid: Option<String>,
    sop_uid: Option<String>,
    preamble: bool,
}

impl DicomBuilder {
    /// 8-bit `MONOCHROME2` image.
    #[must_use]
    pub fn gray8(width: u32, height: u32) -> Self {
        let data = gradient(width, height).map(|v| v as u8).collect();
        Self::with_pixels(width, height, Pixels::Gray8(data))
    }

    /// 16-bit `MONOCHROME2` image with 12 bits stored.
    #[must_use]
    pub fn gray16(width: u32, height: u32) -> Self {
        let data = gradient(width, height).map(|v| (v * 16) as u16).collect();
        Self::with_pixels(width, height, Pixels::Gray16(data))
    }

    /// 8-bit interleaved `RGB` image.
    #[must_use]
    pub fn rgb8(width: u32, height: u32) -> Self {
        let data = gradient(width, height)
            .flat_map(|v| [v as u8, (255 - v) as u8, 128])
            .collect();
        Self::with_pixels(width, height, Pixels::Rgb8(data))
    }

    fn with_pixels(width: u32, height: u32, pixels: Pixels) -> Self {
        Self {
            width,
            height,
            pixels,
            study_uid: Some("1.2.826.0.1.1".to_string()),
            series_uid: Some("1.2.826.0.1.1.2".to_string()),
            sop_uid: Some("1.2.826.0.1.1.2.3".to_string()),
            preamble: true,
        }
    }

    /// Sets all three identifiers.
    #[must_use]
    pub fn uids(mut self, study: &str, series: &str, sop: &str) -> Self {
        self.study_uid = Some(study.to_string());
        self.series_uid = Some(series.to_string());
        self.sop_uid = Some(sop.to_string());
        self
    }

    /// Leaves `StudyInstanceUID` out of the dataset.
    #[must_use]
    pub fn without_study_uid(mut self) -> Self {
        self.study_uid = None;
        self
    }

    /// Omits the 128-byte preamble.
    #[must_use]
    pub const fn without_preamble(mut self) -> Self {
        self.preamble = false;
        self
    }

    /// Tags a host would supply alongside the file.
    #[must_use]
    pub fn tags(&self) -> HashMap<String, String> {
        [
            (TAG_STUDY_UID, &self.study_uid),
            (TAG_SERIES_UID, &self.series_uid),
            (TAG_SOP_UID, &self.sop_uid),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.to_string(), v)))
        .collect()
    }

    /// Encodes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file meta group cannot be built or writing
    /// fails.
    pub fn build(&self) -> Result<Vec<u8>> {
        let (samples, photometric, bits_allocated, bits_stored, pixel_vr, pixel_bytes) =
            match &self.pixels {
                Pixels::Gray8(data) => (1u16, "MONOCHROME2", 8u16, 8u16, VR::OB, data.clone()),
                Pixels::Gray16(data) => (
                    1,
                    "MONOCHROME2",
                    16,
                    12,
                    VR::OW,
                    data.iter().flat_map(|v| v.to_le_bytes()).collect(),
                ),
                Pixels::Rgb8(data) => (3, "RGB", 8, 8, VR::OB, data.clone()),
            };

        let mut elements = vec![
            element(
                tags::SOP_CLASS_UID,
                VR::UI,
                uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
            ),
            element(tags::MODALITY, VR::CS, "OT"),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(samples)),
            element(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, photometric),
            DataElement::new(
                tags::ROWS,
                VR::US,
                PrimitiveValue::from(self.height as u16),
            ),
            DataElement::new(
                tags::COLUMNS,
                VR::US,
                PrimitiveValue::from(self.width as u16),
            ),
            DataElement::new(
                tags::BITS_ALLOCATED,
                VR::US,
                PrimitiveValue::from(bits_allocated),
            ),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(bits_stored)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(bits_stored - 1)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0u16)),
            DataElement::new(tags::PIXEL_DATA, pixel_vr, PrimitiveValue::from(pixel_bytes)),
        ];
        if samples == 3 {
            elements.push(DataElement::new(
                tags::PLANAR_CONFIGURATION,
                VR::US,
                PrimitiveValue::from(0u16),
            ));
        }
        for (tag, uid) in [
            (tags::STUDY_INSTANCE_UID, &self.study_uid),
            (tags::SERIES_INSTANCE_UID, &self.series_uid),
            (tags::SOP_INSTANCE_UID, &self.sop_uid),
        ] {
            if let Some(uid) = uid {
                elements.push(element(tag, VR::UI, uid));
            }
        }

        let sop_uid = self.sop_uid.as_deref().unwrap_or("1.2.826.0.1.9");
        let file = InMemDicomObject::from_element_iter(elements)
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(sop_uid),
            )
            .context("Failed to build file meta group")?;

        let mut bytes = Vec::new();
        file.write_all(&mut bytes)
            .context("Failed to write DICOM file")?;

        if self.preamble {
            Ok(bytes)
        } else {
            Ok(bytes.split_off(128))
        }
    }

    /// Encodes the file and pairs it with its tags.
    ///
    /// # Errors
    ///
    /// Returns an error if [`Self::build`] fails.
    pub fn instance(&self) -> Result<Instance> {
        Ok(Instance::new(self.build()?, self.tags()))
    }

    /// Writes the encoded file to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.build()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn element(tag: Tag, vr: VR, value: &str) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

/// Diagonal 0..=255 gradient in row-major order.
fn gradient(width: u32, height: u32) -> impl Iterator<Item = u32> {
    let span = (width + height).saturating_sub(2).max(1);
    (0..height).flat_map(move |y| (0..width).map(move |x| (x + y) * 255 / span))
}

/// Builder for model directories with the fixed config/checkpoint layout.
///
/// Weights are all zero except the classifier bias, so every anchor scores
/// `sigmoid(classifier_bias)` and boxes equal their anchors.
#[derive(Debug, Clone)]
pub struct ModelDirBuilder {
    config: ExperimentConfig,
    classifier_bias: f32,
    checksum: bool,
}

impl Default for ModelDirBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelDirBuilder {
    /// A small two-stage detector on 64x64 inputs.
    #[must_use]
    pub fn new() -> Self {
        let mut config = ExperimentConfig::default();
        config.model.stages = vec![4, 8];
        config.model.head_levels = 1;
        config.model.anchor_scales = vec![1.0];
        config.model.anchor_ratios = vec![1.0];
        config.model.max_detections = 5;
        config.dataset.img_scale = [64, 64];
        Self {
            config,
            classifier_bias: 2.0,
            checksum: false,
        }
    }

    /// Sets the bias every class logit evaluates to.
    #[must_use]
    pub const fn classifier_bias(mut self, bias: f32) -> Self {
        self.classifier_bias = bias;
        self
    }

    /// Sets `predict.score_threshold` in the written config.
    #[must_use]
    pub const fn score_threshold(mut self, threshold: f32) -> Self {
        self.config.predict.score_threshold = threshold;
        self
    }

    /// Records the checkpoint's SHA-256 in the written config.
    #[must_use]
    pub const fn with_checksum(mut self) -> Self {
        self.checksum = true;
        self
    }

    /// The config that will be written.
    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Encodes the checkpoint as safetensors.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn checkpoint_bytes(&self) -> Result<Vec<u8>> {
        let buffers: Vec<(String, Vec<usize>, Vec<f32>)> = parameter_shapes(&self.config.model)
            .into_iter()
            .map(|(name, shape)| {
                let len = shape.iter().product();
                let fill = if name.contains("classifier.bias") {
                    self.classifier_bias
                } else {
                    0.0
                };
                (name, shape, vec![fill; len])
            })
            .collect();

        let mut views = HashMap::new();
        for (name, shape, data) in &buffers {
            let view = TensorView::new(
                safetensors::Dtype::F32,
                shape.clone(),
                bytemuck::cast_slice(data),
            )
            .with_context(|| format!("Invalid tensor '{name}'"))?;
            views.insert(name.clone(), view);
        }

        safetensors::serialize(&views, &None).context("Failed to serialize checkpoint")
    }

    /// Writes `configs/experiment.toml` and `checkpoints/experiment.safetensors`
    /// under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    pub fn write(&self, root: &Path) -> Result<ModelPaths> {
        let paths = ModelPaths::from_root(root);
        let weights = self.checkpoint_bytes()?;

        let mut config = self.config.clone();
        if self.checksum {
            config.predict.checkpoint_sha256 =
                Some(dicom_detect_core::inference::sha256_hex(&weights));
        }

        for path in [&paths.config, &paths.weights] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let text = toml::to_string(&config).context("Failed to serialize config")?;
        std::fs::write(&paths.config, text)
            .with_context(|| format!("Failed to write {}", paths.config.display()))?;
        std::fs::write(&paths.weights, weights)
            .with_context(|| format!("Failed to write {}", paths.weights.display()))?;

        Ok(paths)
    }
}
