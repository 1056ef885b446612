//! Detection model port.

use candle_core::{Device, Tensor};

use crate::dataset::ImageMeta;
use crate::domain::DetectionRow;

/// A loaded detection model.
pub trait Detector: Send + Sync {
    /// Returns the name this model is registered under.
    fn name(&self) -> &'static str;

    /// Device the model's weights live on. Inputs are prepared there.
    fn device(&self) -> &Device;

    /// Runs one forward pass on a `(1, 3, H, W)` batch.
    ///
    /// Rows are rescaled to the original image described by `meta`. No
    /// probability threshold is applied beyond the model's own score floor.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn detect(&self, batch: &Tensor, meta: &ImageMeta) -> anyhow::Result<Vec<DetectionRow>>;
}
