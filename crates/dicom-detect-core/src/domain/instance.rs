//! Input records supplied by the host platform.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::SkipReason;

/// Tag name carrying the study identifier.
pub const TAG_STUDY_UID: &str = "StudyInstanceUID";
/// Tag name carrying the series identifier.
pub const TAG_SERIES_UID: &str = "SeriesInstanceUID";
/// Tag name carrying the instance identifier.
pub const TAG_SOP_UID: &str = "SOPInstanceUID";

/// A batch handed to `predict`.
///
/// Depending on the model scope this holds a single instance, every instance
/// of a series, or every instance of a study. All scopes are processed the
/// same way.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Records to run detection on, in output order.
    pub instances: Vec<Instance>,
    /// Free-form arguments for a run. Accepted but not interpreted.
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl PredictRequest {
    /// Creates a request without arguments.
    #[must_use]
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances,
            args: HashMap::new(),
        }
    }
}

/// One DICOM instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    /// Raw encoded DICOM file.
    pub file: Vec<u8>,
    /// Identifying tags, keyed by DICOM keyword.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Instance {
    /// Creates an instance from file bytes and tags.
    #[must_use]
    pub fn new(file: Vec<u8>, tags: HashMap<String, String>) -> Self {
        Self { file, tags }
    }

    /// Resolves the study/series/instance identifiers from the tags.
    ///
    /// # Errors
    ///
    /// Returns [`SkipReason::MissingTag`] naming the first absent tag.
    pub fn identifiers(&self) -> Result<Identifiers, SkipReason> {
        let lookup = |tag: &'static str| {
            self.tags
                .get(tag)
                .cloned()
                .ok_or(SkipReason::MissingTag(tag))
        };

        Ok(Identifiers {
            study_uid: lookup(TAG_STUDY_UID)?,
            series_uid: lookup(TAG_SERIES_UID)?,
            instance_uid: lookup(TAG_SOP_UID)?,
        })
    }
}

/// Identifiers copied verbatim onto every result of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifiers {
    /// `StudyInstanceUID`.
    pub study_uid: String,
    /// `SeriesInstanceUID`.
    pub series_uid: String,
    /// `SOPInstanceUID`.
    pub instance_uid: String,
}
