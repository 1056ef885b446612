//! Output format validation tests.
//!
//! Tests JSON/JSONL output format correctness and required field presence.

#![allow(clippy::unwrap_used)]
#![allow(deprecated)] // cargo_bin deprecation

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use dicom_detect_test_support::{DicomBuilder, ModelDirBuilder};
use serde_json::Value;

/// Command isolated from the user's config and data directories.
fn cmd(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dicom-detect").unwrap();
    cmd.current_dir(root)
        .env("HOME", root)
        .env("XDG_CONFIG_HOME", root.join("config"))
        .env("XDG_DATA_HOME", root.join("data"));
    cmd
}

/// Temp root with a model and two instances: one confident, one not.
fn setup(bias: f32) -> (tempfile::TempDir, Vec<PathBuf>) {
    let temp = tempfile::tempdir().unwrap();
    ModelDirBuilder::new()
        .classifier_bias(bias)
        .write(&temp.path().join("data").join("dicom-detect").join("models"))
        .unwrap();

    let files = ["a", "b"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let path = temp.path().join(format!("{name}.dcm"));
            DicomBuilder::gray8(64, 64)
                .uids("7", "7.1", &format!("7.1.{i}"))
                .write_to(&path)
                .unwrap();
            path
        })
        .collect();

    (temp, files)
}

// === JSON Format Tests ===

#[test]
fn test_json_is_single_array() {
    let (temp, files) = setup(-10.0);
    let output = cmd(temp.path())
        .args(["predict", "--format", "json"])
        .args(&files)
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 1);
    let value: Value = serde_json::from_str(&stdout).unwrap();
    let records = value.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["instance_uid"], "7.1.0");
    assert_eq!(records[1]["instance_uid"], "7.1.1");
}

#[test]
fn test_json_pretty() {
    let (temp, files) = setup(-10.0);
    let output = cmd(temp.path())
        .args(["predict", "--format", "json", "--pretty"])
        .args(&files)
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().count() > 2);
    let value: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 2);
}

// === JSONL Format Tests ===

#[test]
fn test_jsonl_one_record_per_line() {
    let (temp, files) = setup(2.0);
    let output = cmd(temp.path())
        .args(["predict", "--format", "jsonl"])
        .args(&files)
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 10);
    for line in lines {
        let value: Value = serde_json::from_str(line).unwrap();
        assert!(value.is_object(), "JSONL line should be an object");
        assert_eq!(value["type"], "ANNOTATION");
    }
}

#[test]
fn test_jsonl_empty_batch_prints_nothing() {
    let temp = tempfile::tempdir().unwrap();
    ModelDirBuilder::new()
        .write(&temp.path().join("data").join("dicom-detect").join("models"))
        .unwrap();
    let broken = temp.path().join("broken.dcm");
    std::fs::write(&broken, b"garbage").unwrap();

    let output = cmd(temp.path())
        .args(["predict", "--format", "jsonl"])
        .arg(&broken)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

// === Schema Tests ===

#[test]
fn test_none_record_fields() {
    let (temp, files) = setup(-10.0);
    let output = cmd(temp.path())
        .arg("predict")
        .arg(&files[0])
        .output()
        .unwrap();

    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    let record = value[0].as_object().unwrap();

    let mut keys: Vec<_> = record.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec!["frame_number", "instance_uid", "series_uid", "study_uid", "type"]
    );
}

#[test]
fn test_annotation_record_fields() {
    let (temp, files) = setup(2.0);
    let output = cmd(temp.path())
        .arg("predict")
        .arg(&files[0])
        .output()
        .unwrap();

    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    let record = value[0].as_object().unwrap();

    for key in [
        "type",
        "study_uid",
        "series_uid",
        "instance_uid",
        "frame_number",
        "class_index",
        "probability",
        "data",
    ] {
        assert!(record.contains_key(key), "missing field {key}");
    }

    let data = record["data"].as_object().unwrap();
    let mut keys: Vec<_> = data.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["height", "width", "x", "y"]);
}
