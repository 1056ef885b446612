//! Core domain types for the inference adapter.

mod instance;
mod result;
mod skip;

pub use instance::{
    Identifiers, Instance, PredictRequest, TAG_SERIES_UID, TAG_SOP_UID, TAG_STUDY_UID,
};
pub use result::{BoxData, DetectionRow, ResultRecord, ResultType};
pub use skip::SkipReason;
