//! Device selection for inference.

use candle_core::Device;
use tracing::info;

/// Returns the best available device for inference.
///
/// Uses CUDA or Metal when the matching feature is compiled in and a device
/// is present, falling back to CPU. Called once per adapter.
#[must_use]
pub fn get_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device for inference");
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device for inference");
            return device;
        }
    }

    info!("Using CPU for inference");
    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_device_returns_valid_device() {
        let device = get_device();
        #[cfg(not(any(feature = "cuda", feature = "metal")))]
        assert!(device.is_cpu());
        let _ = device;
    }
}
