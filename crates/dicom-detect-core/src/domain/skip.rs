//! Reasons an instance is dropped from a batch.

use thiserror::Error;

use super::DetectionRow;

/// Why an instance contributed nothing to the result list.
///
/// Never surfaced in the result schema; reported through logs and progress
/// events only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    /// A required identifier tag was absent.
    #[error("missing tag {0}")]
    MissingTag(&'static str),
    /// The payload was not decodable DICOM pixel data.
    #[error("failed to decode DICOM: {0}")]
    Decode(String),
    /// Writing, loading or transforming the input image failed.
    #[error("failed to prepare input: {0}")]
    Preprocess(String),
    /// The forward pass failed.
    #[error("forward pass failed: {0}")]
    Inference(String),
    /// A surviving detection could not be converted to integer box data.
    #[error("detection row is not finite: {0:?}")]
    InvalidOutput(DetectionRow),
}

impl SkipReason {
    /// Short machine-readable category.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingTag(_) => "missing_tag",
            Self::Decode(_) => "decode",
            Self::Preprocess(_) => "preprocess",
            Self::Inference(_) => "inference",
            Self::InvalidOutput(_) => "invalid_output",
        }
    }
}
