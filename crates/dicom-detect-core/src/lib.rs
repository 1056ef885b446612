//! DICOM Detect Core - Domain types and the inference adapter
//!
//! This crate contains the request/result model, the predict-mode dataset
//! pipeline, the candle-based detector, and the adapter that ties them into
//! a per-instance `predict` operation.

pub mod adapter;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod inference;
pub mod ports;

pub use adapter::InferenceAdapter;
pub use config::{ExperimentConfig, ModelPaths, DEFAULT_SCORE_THRESHOLD};
pub use domain::{
    BoxData, DetectionRow, Identifiers, Instance, PredictRequest, ResultRecord, ResultType,
    SkipReason,
};
pub use ports::{Detector, InstanceDecoder, ProgressEvent, ProgressSink};
