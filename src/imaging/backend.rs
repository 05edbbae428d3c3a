//! Codec capability trait and shared types.
//!
//! The [`ImageBackend`] trait is the only place pixels are touched. Handlers
//! and the dispatcher never decode or encode themselves; they queue
//! [`Transform`](super::Transform)s on a [`Pipeline`](super::Pipeline) which
//! replays them against a backend at encode time.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust and
//! statically linked. Tests use the recording `MockBackend` in this module.

use super::params::{Modulation, ResizeParams, Rgba, RotateParams};
use crate::format::Format;
use crate::policy::EncodeOptions;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Unreadable image: {0}")]
    Unreadable(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("{0}")]
    ProcessingFailed(String),
}

/// Facts read from an image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

/// Trait for codec backends.
///
/// `Image` is the backend's decoded in-memory representation. Every transform
/// consumes an image and returns the next one, so a pipeline is a strict
/// sequential chain with no shared state.
pub trait ImageBackend: Send + Sync {
    type Image;

    /// Read dimensions and container format without rasterizing.
    fn identify(&self, data: &[u8]) -> Result<ImageMetadata, BackendError>;

    /// Fully decode an encoded buffer.
    fn decode(&self, data: &[u8]) -> Result<Self::Image, BackendError>;

    fn resize(&self, image: Self::Image, params: &ResizeParams)
    -> Result<Self::Image, BackendError>;

    fn rotate(&self, image: Self::Image, params: &RotateParams)
    -> Result<Self::Image, BackendError>;

    fn blur(&self, image: Self::Image, sigma: f32) -> Result<Self::Image, BackendError>;

    fn sharpen(&self, image: Self::Image, sigma: f32) -> Result<Self::Image, BackendError>;

    /// Brightness, saturation and hue in a single pass.
    fn modulate(&self, image: Self::Image, modulation: &Modulation)
    -> Result<Self::Image, BackendError>;

    fn grayscale(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    fn sepia(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    fn negate(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    fn tint(&self, image: Self::Image, color: Rgba) -> Result<Self::Image, BackendError>;

    /// Stretch contrast to the full range.
    fn normalize(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    /// Median noise reduction with a square window of `size` pixels.
    fn median(&self, image: Self::Image, size: u32) -> Result<Self::Image, BackendError>;

    /// Decode `overlay` and blend it centered over `image`.
    fn composite(&self, image: Self::Image, overlay: &[u8]) -> Result<Self::Image, BackendError>;

    fn encode(
        &self,
        image: &Self::Image,
        format: Format,
        options: &EncodeOptions,
    ) -> Result<Vec<u8>, BackendError>;
}
