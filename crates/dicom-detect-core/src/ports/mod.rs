//! Port definitions for hexagonal architecture.
//!
//! These traits define the boundaries between the adapter core and the
//! decoding, inference and reporting backends plugged into it.

mod detector;
mod instance_decoder;
mod progress;

pub use detector::Detector;
pub use instance_decoder::InstanceDecoder;
pub use progress::{NoopProgress, ProgressEvent, ProgressSink};
