//! Decoding port for encoded instance payloads.

/// Port for turning an encoded payload into a pixel array.
pub trait InstanceDecoder: Send + Sync {
    /// Decodes the first frame of `bytes`.
    ///
    /// Grayscale data stays single-channel; the adapter broadcasts it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed or its pixel data cannot
    /// be decoded.
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<image::DynamicImage>;
}
