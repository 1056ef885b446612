//! Checkpoint loading utilities for safetensors format.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use safetensors::SafeTensors;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Loads a safetensors file and creates a `VarBuilder` for the model.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the safetensors data is
/// invalid.
pub fn load_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<VarBuilder<'static>> {
    load_checkpoint(path, device, None)
}

/// Loads a checkpoint, verifying its SHA-256 first when `expected_sha256` is
/// set.
///
/// Parameters are later resolved by name through the returned builder, so a
/// missing or misshapen tensor fails at model construction.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The checksum does not match
/// - The safetensors data is invalid
pub fn load_checkpoint(
    path: impl AsRef<Path>,
    device: &Device,
    expected_sha256: Option<&str>,
) -> Result<VarBuilder<'static>> {
    let path = path.as_ref();
    debug!("Loading checkpoint from {}", path.display());

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;

    if let Some(expected) = expected_sha256 {
        let actual = sha256_hex(&data);
        if !actual.eq_ignore_ascii_case(expected) {
            anyhow::bail!(
                "Checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            );
        }
        debug!("Checkpoint checksum verified");
    }

    let tensors = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

    // Convert to HashMap<String, Tensor> for VarBuilder
    let mut tensor_map: HashMap<String, Tensor> = HashMap::new();

    for name in tensors.names() {
        let tensor_view = tensors
            .tensor(name)
            .with_context(|| format!("Failed to get tensor '{name}'"))?;

        let dtype = safetensors_dtype_to_candle(tensor_view.dtype())?;
        let shape: Vec<usize> = tensor_view.shape().to_vec();

        let tensor = Tensor::from_raw_buffer(tensor_view.data(), dtype, &shape, device)
            .with_context(|| format!("Failed to create tensor '{name}'"))?;

        tensor_map.insert(name.clone(), tensor);
    }

    debug!("Loaded {} tensors", tensor_map.len());

    // VarBuilder::from_tensors takes ownership
    Ok(VarBuilder::from_tensors(tensor_map, DType::F32, device))
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Converts safetensors dtype to candle dtype.
fn safetensors_dtype_to_candle(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Ok(DType::F32),
        S::F64 => Ok(DType::F64),
        S::F16 => Ok(DType::F16),
        S::BF16 => Ok(DType::BF16),
        S::I64 => Ok(DType::I64),
        S::U8 => Ok(DType::U8),
        S::U32 => Ok(DType::U32),
        other => anyhow::bail!("Unsupported dtype: {other:?}"),
    }
}
