//! ML inference engine using Candle.
//!
//! Provides device selection, checkpoint loading and the anchor-based
//! detector used by the adapter.

mod detector;
mod device;
mod loader;
mod utils;

pub use detector::{build_detector, parameter_shapes, AnchorDetector, ANCHOR_DETECTOR};
pub use device::get_device;
pub use loader::{load_checkpoint, load_safetensors, sha256_hex};
pub use utils::{iou, nms, sigmoid, Candidate};
