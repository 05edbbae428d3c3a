//! Shared test utilities for the imgforge test suite.
//!
//! Builds synthetic images in every supported format so tests never depend
//! on fixture files.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let jpeg = encoded(Format::Jpeg, 100, 100);
//! let uploads = Uploads::image(jpeg);
//! assert_eq!(decoded_dimensions(&output.bytes), (50, 50));
//! ```

use crate::format::Format;
use crate::imaging::{ImageBackend, RustBackend};
use crate::policy::policy_for;
use bytes::Bytes;
use image::{DynamicImage, RgbImage};

// =========================================================================
// Synthetic images
// =========================================================================

/// An RGB gradient with distinct values along both axes.
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    }))
}

/// A gradient encoded as `format` with the stock policy.
pub fn encoded(format: Format, width: u32, height: u32) -> Bytes {
    RustBackend::new()
        .encode(&gradient(width, height), format, policy_for(format))
        .map(Bytes::from)
        .unwrap_or_else(|e| panic!("failed to encode {format} fixture: {e}"))
}

// =========================================================================
// Output inspection (panics with a clear message on failure)
// =========================================================================

/// Decode any supported buffer and return its dimensions.
pub fn decoded_dimensions(data: &[u8]) -> (u32, u32) {
    let image = RustBackend::new()
        .decode(data)
        .unwrap_or_else(|e| panic!("output did not decode: {e}"));
    (image.width(), image.height())
}

/// Detect the container format of an encoded buffer.
pub fn detected_format(data: &[u8]) -> Format {
    RustBackend::new()
        .identify(data)
        .unwrap_or_else(|e| panic!("output did not identify: {e}"))
        .format
}
