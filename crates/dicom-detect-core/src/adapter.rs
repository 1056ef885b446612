//! The inference adapter: the host platform's `predict` entry point.
//!
//! Per instance: decode → [`InferenceAdapter::prepare_input`] →
//! [`InferenceAdapter::forward`] → result records. A failing instance is
//! logged and dropped; `predict` itself never fails.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info, warn};

use crate::config::{DatasetConfig, ExperimentConfig, ModelPaths};
use crate::dataset::{Annotation, PredictDataset, Sample};
use crate::domain::{DetectionRow, Instance, PredictRequest, ResultRecord, SkipReason};
use crate::inference::{build_detector, get_device, load_checkpoint};
use crate::ports::{Detector, InstanceDecoder, NoopProgress, ProgressEvent, ProgressSink};

/// Loaded model plus the configuration it was built from.
pub struct InferenceAdapter {
    config: ExperimentConfig,
    detector: Box<dyn Detector>,
    decoder: Box<dyn InstanceDecoder>,
}

impl InferenceAdapter {
    /// Assembles an adapter from already-built parts.
    ///
    /// The dataset's `data_dir` is pointed at the system temporary directory,
    /// where input images are staged.
    #[must_use]
    pub fn new(
        config: ExperimentConfig,
        detector: Box<dyn Detector>,
        decoder: Box<dyn InstanceDecoder>,
    ) -> Self {
        Self {
            config,
            detector,
            decoder,
        }
        .with_tmp_dir(std::env::temp_dir())
    }

    /// Loads config and weights from the fixed model layout.
    ///
    /// Selects the device, reads the experiment config, verifies the
    /// checkpoint checksum when configured, and builds the detector from the
    /// checkpoint by parameter name.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or checkpoint is missing, corrupt, or
    /// does not match the configured model. The adapter cannot serve in that
    /// case.
    pub fn load(paths: &ModelPaths, decoder: Box<dyn InstanceDecoder>) -> Result<Self> {
        let device = get_device();

        let config = ExperimentConfig::from_file(&paths.config)?;

        let vb = load_checkpoint(
            &paths.weights,
            &device,
            config.predict.checkpoint_sha256.as_deref(),
        )?;
        let detector = build_detector(&config.model, vb)
            .with_context(|| format!("Failed to build model '{}'", config.model.name))?;

        info!(
            "Loaded {} from {}",
            detector.name(),
            paths.weights.display()
        );

        Ok(Self::new(config, detector, decoder))
    }

    /// Stages temporary input images in `dir` instead.
    #[must_use]
    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.dataset.data_dir = dir.into();
        self
    }

    /// Overrides the probability threshold for emitted detections.
    #[must_use]
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.config.predict.score_threshold = threshold;
        self
    }

    /// The configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Directory holding temporary input images.
    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        &self.config.dataset.data_dir
    }

    /// Converts a decoded pixel array into a model input.
    ///
    /// Grayscale images are broadcast to three channels and written as PNG to
    /// a randomly named file in the temporary directory. The dataset then
    /// loads it with the training-time preprocessing, and the file is removed
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or the
    /// dataset fails to load it.
    pub fn prepare_input(&self, image: &DynamicImage) -> Result<Sample> {
        let rgb = broadcast_channels(image);
        let dataset_config: &DatasetConfig = &self.config.dataset;

        let staged = tempfile::Builder::new()
            .prefix("img-")
            .suffix(".png")
            .tempfile_in(&dataset_config.data_dir)
            .with_context(|| {
                format!(
                    "Failed to create temporary image in {}",
                    dataset_config.data_dir.display()
                )
            })?;

        rgb.save_with_format(staged.path(), ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", staged.path().display()))?;

        let filename = staged
            .path()
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .context("Temporary image has no file name")?;
        debug!("Staged input image {filename}");

        let annotation = Annotation {
            filename,
            height: rgb.height(),
            width: rgb.width(),
        };
        let dataset = PredictDataset::new(dataset_config, vec![annotation], self.detector.device());
        let sample = dataset.get(0);

        if let Err(e) = staged.close() {
            warn!("Failed to remove temporary image: {e}");
        }

        sample
    }

    /// Runs one forward pass and keeps rows at or above the score threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if input preparation or the forward pass fails.
    pub fn forward(&self, image: &DynamicImage) -> Result<Vec<DetectionRow>> {
        let sample = self.prepare_input(image)?;
        self.detect_sample(&sample)
    }

    fn detect_sample(&self, sample: &Sample) -> Result<Vec<DetectionRow>> {
        let batch = sample.img.unsqueeze(0)?;
        let rows = self.detector.detect(&batch, &sample.meta)?;
        Ok(apply_threshold(rows, self.config.predict.score_threshold))
    }

    /// Runs detection over a batch.
    ///
    /// Returns one `NONE` record or N `ANNOTATION` records per instance, in
    /// input order. Instances that fail at any step contribute nothing.
    #[must_use]
    pub fn predict(&self, request: &PredictRequest) -> Vec<ResultRecord> {
        self.predict_with_progress(request, &NoopProgress)
    }

    /// Same as [`Self::predict`], reporting per-instance progress to `sink`.
    #[must_use]
    pub fn predict_with_progress(
        &self,
        request: &PredictRequest,
        sink: &dyn ProgressSink,
    ) -> Vec<ResultRecord> {
        if !request.args.is_empty() {
            debug!("Ignoring {} predict arguments", request.args.len());
        }

        let total = request.instances.len();
        let mut results = Vec::new();
        let mut processed = 0usize;
        let mut skipped = 0usize;

        for (index, instance) in request.instances.iter().enumerate() {
            sink.on_event(ProgressEvent::Started { index, total });

            match self.predict_instance(instance) {
                Ok(records) => {
                    let detections = records
                        .iter()
                        .filter(|r| r.class_index.is_some())
                        .count();
                    sink.on_event(ProgressEvent::Completed {
                        index,
                        instance_uid: records
                            .first()
                            .map(|r| r.instance_uid.clone())
                            .unwrap_or_default(),
                        detections,
                    });
                    results.extend(records);
                    processed += 1;
                }
                Err(reason) => {
                    warn!("Skipping instance {index} ({}): {reason}", reason.kind());
                    sink.on_event(ProgressEvent::Skipped { index, reason });
                    skipped += 1;
                }
            }
        }

        sink.on_event(ProgressEvent::Finished { processed, skipped });
        results
    }

    /// Produces the records of one instance.
    fn predict_instance(&self, instance: &Instance) -> Result<Vec<ResultRecord>, SkipReason> {
        let ids = instance.identifiers()?;

        let image = self
            .decoder
            .decode(&instance.file)
            .map_err(|e| SkipReason::Decode(format!("{e:#}")))?;

        let sample = self
            .prepare_input(&image)
            .map_err(|e| SkipReason::Preprocess(format!("{e:#}")))?;

        let rows = self
            .detect_sample(&sample)
            .map_err(|e| SkipReason::Inference(format!("{e:#}")))?;

        debug!(
            "Instance {}: {} detections above threshold",
            ids.instance_uid,
            rows.len()
        );

        if rows.is_empty() {
            return Ok(vec![ResultRecord::none(&ids)]);
        }

        rows.iter()
            .map(|row| ResultRecord::annotation(&ids, row))
            .collect()
    }
}

/// Keeps rows whose probability is at least `threshold`.
fn apply_threshold(rows: Vec<DetectionRow>, threshold: f32) -> Vec<DetectionRow> {
    rows.into_iter().filter(|row| row[4] >= threshold).collect()
}

/// Broadcasts single-channel images to three channels, keeping bit depth.
fn broadcast_channels(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgb16(_) => image.clone(),
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgba16(_) => DynamicImage::ImageRgb16(image.to_rgb16()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dataset::ImageMeta;
    use crate::domain::{ResultType, TAG_SERIES_UID, TAG_SOP_UID, TAG_STUDY_UID};
    use candle_core::{Device, Tensor};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Decodes any payload to a flat 40x30 gray image, except `b"bad"`.
    struct StubDecoder;

    impl InstanceDecoder for StubDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
            if bytes == b"bad" {
                anyhow::bail!("not DICOM");
            }
            Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 30, Luma([90]))))
        }
    }

    /// Returns canned rows and remembers the input shapes it saw.
    struct StubDetector {
        rows: Vec<DetectionRow>,
        seen: Arc<Mutex<Vec<Vec<usize>>>>,
        device: Device,
    }

    impl StubDetector {
        fn new(rows: Vec<DetectionRow>) -> Self {
            Self {
                rows,
                seen: Arc::default(),
                device: Device::Cpu,
            }
        }
    }

    impl Detector for StubDetector {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn device(&self) -> &Device {
            &self.device
        }

        fn detect(&self, batch: &Tensor, _meta: &ImageMeta) -> Result<Vec<DetectionRow>> {
            self.seen.lock().unwrap().push(batch.dims().to_vec());
            Ok(self.rows.clone())
        }
    }

    fn config() -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.dataset.img_scale = [64, 64];
        config
    }

    fn adapter(rows: Vec<DetectionRow>, tmp: &Path) -> InferenceAdapter {
        InferenceAdapter::new(
            config(),
            Box::new(StubDetector::new(rows)),
            Box::new(StubDecoder),
        )
        .with_tmp_dir(tmp)
    }

    fn instance(uid: &str, file: &[u8]) -> Instance {
        Instance::new(
            file.to_vec(),
            HashMap::from([
                (TAG_STUDY_UID.to_string(), format!("{uid}.study")),
                (TAG_SERIES_UID.to_string(), format!("{uid}.series")),
                (TAG_SOP_UID.to_string(), uid.to_string()),
            ]),
        )
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let rows = vec![
            [0.0, 1.0, 0.0, 1.0, 0.2],
            [0.0, 1.0, 0.0, 1.0, 0.199_999],
            [0.0, 1.0, 0.0, 1.0, 0.9],
        ];
        let kept = apply_threshold(rows, 0.2);
        assert_eq!(kept.len(), 2);
        assert!((kept[0][4] - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_no_detections_yields_single_none() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![[1.0, 2.0, 3.0, 4.0, 0.1]], tmp.path());

        let results = adapter.predict(&PredictRequest::new(vec![instance("1.1", b"ok")]));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result_type, ResultType::None);
        assert_eq!(results[0].instance_uid, "1.1");
        assert!(results[0].class_index.is_none());
        assert!(results[0].probability.is_none());
        assert!(results[0].data.is_none());
    }

    #[test]
    fn test_annotations_per_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let rows = vec![
            [5.0, 15.0, 6.0, 20.0, 0.2],
            [1.0, 2.0, 3.0, 4.0, 0.8],
            [1.0, 2.0, 3.0, 4.0, 0.05],
        ];
        let adapter = adapter(rows, tmp.path());

        let results = adapter.predict(&PredictRequest::new(vec![instance("1.2", b"ok")]));

        assert_eq!(results.len(), 2);
        for record in &results {
            assert_eq!(record.result_type, ResultType::Annotation);
            assert_eq!(record.class_index, Some(0));
            assert_eq!(record.study_uid, "1.2.study");
            assert_eq!(record.series_uid, "1.2.series");
            assert_eq!(record.instance_uid, "1.2");
        }
        assert_eq!(results[0].probability, Some(0.2));
    }

    #[test]
    fn test_bad_instance_is_skipped_not_propagated() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![[1.0, 2.0, 3.0, 4.0, 0.5]], tmp.path());

        let request = PredictRequest::new(vec![
            instance("a", b"ok"),
            instance("b", b"bad"),
            instance("c", b"ok"),
        ]);
        let results = adapter.predict(&request);

        let uids: Vec<_> = results.iter().map(|r| r.instance_uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "c"]);
    }

    #[test]
    fn test_missing_tag_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![], tmp.path());

        let mut incomplete = instance("x", b"ok");
        incomplete.tags.remove(TAG_STUDY_UID);
        let results = adapter.predict(&PredictRequest::new(vec![incomplete, instance("y", b"ok")]));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].instance_uid, "y");
    }

    #[test]
    fn test_non_finite_row_skips_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![[f32::NAN, 2.0, 3.0, 4.0, 0.5]], tmp.path());
        let results = adapter.predict(&PredictRequest::new(vec![instance("n", b"ok")]));
        assert!(results.is_empty());
    }

    #[test]
    fn test_overflowing_row_skips_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![[-3e38, 3e38, 0.0, 1.0, 0.9]], tmp.path());
        let request = PredictRequest::new(vec![instance("o", b"ok"), instance("p", b"ok")]);
        assert!(adapter.predict(&request).is_empty());
    }

    #[test]
    fn test_prepare_input_removes_temporary_file() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![], tmp.path());

        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(20, 10, Luma([3])));
        let sample = adapter.prepare_input(&image).unwrap();

        assert_eq!(sample.img.dims(), &[3, 32, 64]);
        assert_eq!(sample.meta.ori_shape, (10, 20));
        assert!(sample.meta.filename.starts_with(tmp.path()));
        assert!(!sample.meta.filename.exists());
        assert_eq!(staged_files(tmp.path()), 0);
    }

    #[test]
    fn test_gray_and_rgb_inputs_match() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![], tmp.path());

        let gray = DynamicImage::ImageLuma8(GrayImage::from_fn(24, 16, |x, y| {
            Luma([u8::try_from(x * 10 + y).unwrap_or(u8::MAX)])
        }));
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_fn(24, 16, |x, y| {
            let v = u8::try_from(x * 10 + y).unwrap_or(u8::MAX);
            Rgb([v, v, v])
        }));

        let from_gray = adapter.prepare_input(&gray).unwrap();
        let from_rgb = adapter.prepare_input(&rgb).unwrap();

        assert_eq!(from_gray.img.dims(), from_rgb.img.dims());
        assert_eq!(
            from_gray.img.to_vec3::<f32>().unwrap(),
            from_rgb.img.to_vec3::<f32>().unwrap()
        );
    }

    #[test]
    fn test_sixteen_bit_gray_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![], tmp.path());

        let image = DynamicImage::ImageLuma16(image::ImageBuffer::from_pixel(16, 16, Luma([4000u16])));
        let sample = adapter.prepare_input(&image).unwrap();
        assert_eq!(sample.img.dims()[0], 3);
    }

    #[test]
    fn test_detector_receives_single_image_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let detector = StubDetector::new(vec![]);
        let seen = Arc::clone(&detector.seen);
        let adapter = InferenceAdapter::new(config(), Box::new(detector), Box::new(StubDecoder))
            .with_tmp_dir(tmp.path());

        let rows = adapter
            .forward(&DynamicImage::ImageLuma8(GrayImage::new(40, 20)))
            .unwrap();
        assert!(rows.is_empty());

        // 40x20 rescaled into 64x64 is 64x32, already a multiple of 32
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 3, 32, 64]]);
    }

    #[test]
    fn test_missing_tmp_dir_skips_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![], &tmp.path().join("missing"));
        let results = adapter.predict(&PredictRequest::new(vec![instance("m", b"ok")]));
        assert!(results.is_empty());
    }

    #[test]
    fn test_result_count_bound() {
        let tmp = tempfile::tempdir().unwrap();
        let rows = vec![[0.0, 1.0, 0.0, 1.0, 0.5]; 3];
        let adapter = adapter(rows, tmp.path());

        let request = PredictRequest::new(vec![
            instance("a", b"ok"),
            instance("b", b"bad"),
            instance("c", b"ok"),
        ]);
        let results = adapter.predict(&request);

        // 3 per good instance, 0 for the bad one
        assert_eq!(results.len(), 6);
        assert_eq!(staged_files(tmp.path()), 0);
    }

    #[test]
    fn test_score_threshold_override() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = adapter(vec![[0.0, 1.0, 0.0, 1.0, 0.5]], tmp.path()).with_score_threshold(0.6);
        let results = adapter.predict(&PredictRequest::new(vec![instance("t", b"ok")]));
        assert_eq!(results[0].result_type, ResultType::None);
    }

    #[test]
    fn test_load_missing_files_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ModelPaths::from_root(tmp.path());
        let result = InferenceAdapter::load(&paths, Box::new(StubDecoder));
        assert!(result.is_err());
    }
}
