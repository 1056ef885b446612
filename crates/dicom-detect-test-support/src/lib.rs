//! Test support utilities for dicom-detect.
//!
//! Provides mocks, synthetic DICOM and model directory builders for testing
//! the inference adapter.
//!
//! # Example
//!
//! ```
//! use dicom_detect_test_support::{DicomBuilder, MockDetector};
//!
//! // Encode a synthetic 8-bit grayscale instance
//! let instance = DicomBuilder::gray8(32, 32).instance().unwrap();
//!
//! // Detector returning one canned row
//! let detector = MockDetector::new(vec![[1.0, 9.0, 2.0, 8.0, 0.75]]);
//! # let _ = (instance, detector);
//! ```

mod builders;
mod mocks;

pub use builders::{DicomBuilder, ModelDirBuilder};
pub use mocks::{MockDecoder, MockDetector, MockProgressSink};
