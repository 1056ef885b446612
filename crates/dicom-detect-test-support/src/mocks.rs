//! Mock implementations of core port traits.

use std::sync::{Arc, Mutex, PoisonError};

use candle_core::{Device, Tensor};
use image::{DynamicImage, GrayImage, Luma};

use dicom_detect_core::dataset::ImageMeta;
use dicom_detect_core::domain::DetectionRow;
use dicom_detect_core::ports::{Detector, InstanceDecoder, ProgressEvent, ProgressSink};

/// Mock implementation of `Detector` for testing.
///
/// Returns canned rows and records the geometry of every call.
pub struct MockDetector {
    rows: Vec<DetectionRow>,
    calls: Arc<Mutex<Vec<(Vec<usize>, ImageMeta)>>>,
    device: Device,
}

impl MockDetector {
    /// Creates a detector returning `rows` for every image.
    #[must_use]
    pub fn new(rows: Vec<DetectionRow>) -> Self {
        Self {
            rows,
            calls: Arc::new(Mutex::new(Vec::new())),
            device: Device::Cpu,
        }
    }

    /// Creates a detector that never finds anything.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Returns the number of forward passes run.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `(batch dims, meta)` of every call.
    #[must_use]
    pub fn calls(&self) -> Vec<(Vec<usize>, ImageMeta)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shares the call log, for inspection after the detector is boxed.
    #[must_use]
    pub fn call_log(&self) -> Arc<Mutex<Vec<(Vec<usize>, ImageMeta)>>> {
        Arc::clone(&self.calls)
    }
}

impl Detector for MockDetector {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn detect(&self, batch: &Tensor, meta: &ImageMeta) -> anyhow::Result<Vec<DetectionRow>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((batch.dims().to_vec(), meta.clone()));
        Ok(self.rows.clone())
    }
}

/// Mock implementation of `InstanceDecoder` for testing.
///
/// Payloads starting with `b"ok"` decode to a flat gray image; anything else
/// fails.
pub struct MockDecoder {
    width: u32,
    height: u32,
}

impl MockDecoder {
    /// Creates a decoder producing `width`x`height` images.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self::new(32, 32)
    }
}

impl InstanceDecoder for MockDecoder {
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<DynamicImage> {
        if !bytes.starts_with(b"ok") {
            anyhow::bail!("Malformed payload");
        }
        Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            self.width,
            self.height,
            Luma([100]),
        )))
    }
}

/// Mock implementation of `ProgressSink` for testing.
///
/// Captures events for later assertions.
pub struct MockProgressSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MockProgressSink {
    /// Creates a new mock progress sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of `Started` events.
    #[must_use]
    pub fn started_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Started { .. }))
            .count()
    }

    /// Returns the number of `Completed` events.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Completed { .. }))
            .count()
    }

    /// Returns the skip reason kinds, in order.
    #[must_use]
    pub fn skipped_kinds(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Skipped { reason, .. } => Some(reason.kind()),
                _ => None,
            })
            .collect()
    }

    /// Returns the final counts from the `Finished` event, if any.
    #[must_use]
    pub fn finished_counts(&self) -> Option<(usize, usize)> {
        self.events().iter().find_map(|e| match e {
            ProgressEvent::Finished { processed, skipped } => Some((*processed, *skipped)),
            _ => None,
        })
    }
}

impl Default for MockProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for MockProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
