//! Model directory adapter.

use dicom_detect_core::ModelPaths;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Returns the default model root.
///
/// Uses `XDG_DATA_HOME/dicom-detect/models` or
/// `~/.local/share/dicom-detect/models`.
#[must_use]
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dicom-detect")
        .join("models")
}

/// Resolves the model layout under `root`, or under [`models_dir`].
#[must_use]
pub fn model_paths(root: Option<&Path>) -> ModelPaths {
    let root = root.map_or_else(models_dir, Path::to_path_buf);
    debug!("Using model root {}", root.display());
    ModelPaths::from_root(root)
}

/// Lists the model files with whether each exists.
#[must_use]
pub fn list_model_files(paths: &ModelPaths) -> Vec<(PathBuf, bool)> {
    [&paths.config, &paths.weights]
        .into_iter()
        .map(|p| (p.clone(), p.is_file()))
        .collect()
}
