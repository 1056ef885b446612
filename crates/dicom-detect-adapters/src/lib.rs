//! DICOM Detect Adapters - External adapters for dicom-detect.
//!
//! This crate provides adapters for:
//! - DICOM decoding and identifier extraction
//! - Model directory layout

pub mod dicom;
pub mod models;

pub use dicom::{parse_dicom, read_identifiers, DicomDecoder};
pub use models::{list_model_files, model_paths, models_dir};
