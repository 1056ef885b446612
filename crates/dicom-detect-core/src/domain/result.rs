//! Result records returned to the host platform.

use serde::{Deserialize, Serialize};

use super::{Identifiers, SkipReason};

/// One raw detection: `[x_min, x_max, y_min, y_max, probability]`.
///
/// Coordinates are pixels of the original image.
pub type DetectionRow = [f32; 5];

/// Kind of result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    /// Nothing above threshold for the instance.
    None,
    /// One detection.
    Annotation,
}

/// Box payload of an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxData {
    /// Left edge in pixels.
    pub x: i64,
    /// Top edge in pixels.
    pub y: i64,
    /// Box width in pixels.
    pub width: i64,
    /// Box height in pixels.
    pub height: i64,
}

/// One entry of the `predict` output list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// `NONE` or `ANNOTATION`.
    #[serde(rename = "type")]
    pub result_type: ResultType,
    /// Study identifier of the source instance.
    pub study_uid: String,
    /// Series identifier of the source instance.
    pub series_uid: String,
    /// SOP instance identifier of the source instance.
    pub instance_uid: String,
    /// Always `null`; multi-frame output is not produced.
    pub frame_number: Option<u32>,
    /// Class of the detection (annotations only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_index: Option<u32>,
    /// Detection probability (annotations only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f32>,
    /// Box of the detection (annotations only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BoxData>,
}

impl ResultRecord {
    /// Record stating that nothing was detected.
    #[must_use]
    pub fn none(ids: &Identifiers) -> Self {
        Self {
            result_type: ResultType::None,
            study_uid: ids.study_uid.clone(),
            series_uid: ids.series_uid.clone(),
            instance_uid: ids.instance_uid.clone(),
            frame_number: None,
            class_index: None,
            probability: None,
            data: None,
        }
    }

    /// Annotation record for one raw detection row.
    ///
    /// Height is `trunc(row[3]) - trunc(row[4])`, i.e. `y_max` minus the
    /// probability column. Every class maps to index 0.
    ///
    /// # Errors
    ///
    /// Returns [`SkipReason::InvalidOutput`] when a value used for the box is
    /// not finite or a box extent overflows `i64`.
    pub fn annotation(ids: &Identifiers, row: &DetectionRow) -> Result<Self, SkipReason> {
        let int = |v: f32| {
            if v.is_finite() {
                #[allow(clippy::cast_possible_truncation)]
                Ok(v.trunc() as i64)
            } else {
                Err(SkipReason::InvalidOutput(*row))
            }
        };

        let span = |hi: f32, lo: f32| {
            int(hi)?
                .checked_sub(int(lo)?)
                .ok_or(SkipReason::InvalidOutput(*row))
        };

        let data = BoxData {
            x: int(row[0])?,
            y: int(row[2])?,
            width: span(row[1], row[0])?,
            // TODO: confirm against the training code whether this should be row[3] - row[2]
            height: span(row[3], row[4])?,
        };

        Ok(Self {
            result_type: ResultType::Annotation,
            study_uid: ids.study_uid.clone(),
            series_uid: ids.series_uid.clone(),
            instance_uid: ids.instance_uid.clone(),
            frame_number: None,
            class_index: Some(0),
            probability: Some(row[4]),
            data: Some(data),
        })
    }
}
