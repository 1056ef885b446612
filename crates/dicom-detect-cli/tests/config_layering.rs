//! Integration tests for configuration layering.
//!
//! Tests the full priority chain: hardcoded defaults < XDG config < project config < CLI args

#![allow(clippy::unwrap_used)] // Test code uses unwrap for brevity
#![allow(deprecated)] // cargo_bin deprecation warning

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use dicom_detect_test_support::{DicomBuilder, ModelDirBuilder};
use predicates::prelude::*;

/// Command isolated from the user's config and data directories.
fn cmd(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dicom-detect").unwrap();
    cmd.current_dir(root)
        .env("HOME", root)
        .env("XDG_CONFIG_HOME", root.join("config"))
        .env("XDG_DATA_HOME", root.join("data"));
    cmd
}

fn write_xdg_config(root: &Path, content: &str) {
    let dir = root.join("config").join("dicom-detect");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), content).unwrap();
}

fn write_project_config(dir: &Path, content: &str) {
    fs::write(dir.join(".dicom-detect.toml"), content).unwrap();
}

/// Temp root with a model under `custom-model/` and one DICOM file.
fn setup() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    ModelDirBuilder::new()
        .classifier_bias(0.0)
        .write(&temp.path().join("custom-model"))
        .unwrap();

    let file = temp.path().join("a.dcm");
    DicomBuilder::gray8(64, 64).write_to(&file).unwrap();
    (temp, file)
}

#[test]
fn test_model_dir_from_xdg_config() {
    let (temp, file) = setup();
    let model = temp.path().join("custom-model");
    write_xdg_config(
        temp.path(),
        &format!("[models]\ndir = '{}'\n", model.display()),
    );

    cmd(temp.path())
        .arg("predict")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("ANNOTATION"));
}

#[test]
fn test_model_dir_from_project_config() {
    let (temp, file) = setup();
    let project = temp.path().join("project").join("nested");
    fs::create_dir_all(&project).unwrap();
    write_project_config(
        &temp.path().join("project"),
        &format!(
            "[models]\ndir = '{}'\n",
            temp.path().join("custom-model").display()
        ),
    );

    // Found by searching up from the working directory
    cmd(temp.path())
        .current_dir(&project)
        .arg("predict")
        .arg(&file)
        .assert()
        .success();
}

#[test]
fn test_project_config_overrides_xdg() {
    let (temp, file) = setup();
    let model = temp.path().join("custom-model");
    write_xdg_config(
        temp.path(),
        &format!(
            "[models]\ndir = '{}'\n\n[predict]\nscore_threshold = 0.9\n",
            model.display()
        ),
    );
    write_project_config(temp.path(), "[predict]\nscore_threshold = 0.5\n");

    // sigmoid(0) = 0.5 passes the project threshold, not the XDG one
    cmd(temp.path())
        .arg("predict")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("ANNOTATION"));
}

#[test]
fn test_cli_overrides_project_config() {
    let (temp, file) = setup();
    write_project_config(
        temp.path(),
        &format!(
            "[models]\ndir = '{}'\n\n[predict]\nscore_threshold = 0.5\n",
            temp.path().join("custom-model").display()
        ),
    );

    cmd(temp.path())
        .args(["predict", "--score-threshold", "0.6"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"NONE\""));
}

#[test]
fn test_project_config_applies_format() {
    let (temp, file) = setup();
    write_project_config(
        temp.path(),
        &format!(
            "[models]\ndir = '{}'\n\n[output]\nformat = 'jsonl'\n",
            temp.path().join("custom-model").display()
        ),
    );

    cmd(temp.path())
        .arg("predict")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"));
}

#[test]
fn test_cli_format_overrides_config() {
    let (temp, file) = setup();
    write_project_config(
        temp.path(),
        &format!(
            "[models]\ndir = '{}'\n\n[output]\nformat = 'jsonl'\n",
            temp.path().join("custom-model").display()
        ),
    );

    cmd(temp.path())
        .args(["predict", "--format", "json"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["));
}

#[test]
fn test_cli_model_dir_overrides_config() {
    let (temp, file) = setup();
    write_project_config(temp.path(), "[models]\ndir = '/nonexistent/model'\n");

    cmd(temp.path())
        .arg("predict")
        .arg("--model-dir")
        .arg(temp.path().join("custom-model"))
        .arg(&file)
        .assert()
        .success();
}

#[test]
fn test_invalid_config_warns() {
    let (temp, file) = setup();
    write_project_config(
        temp.path(),
        &format!(
            "[models]\ndir = '{}'\n\n[output]\nformat = 'xml'\n",
            temp.path().join("custom-model").display()
        ),
    );

    // Unknown format falls back to the default array output
    cmd(temp.path())
        .arg("predict")
        .arg(&file)
        .assert()
        .success()
        .stderr(predicate::str::contains("output.format must be"))
        .stdout(predicate::str::starts_with("["));
}

#[test]
fn test_models_path_from_config() {
    let temp = tempfile::tempdir().unwrap();
    write_project_config(temp.path(), "[models]\ndir = '/opt/detector'\n");

    cmd(temp.path())
        .args(["models", "path"])
        .assert()
        .success()
        .stdout(predicate::str::diff("/opt/detector\n"));
}
