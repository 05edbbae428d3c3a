//! Upload validation.
//!
//! Runs once per request, before any handler. Only the container header is
//! read; pixels are not decoded here.

use crate::error::TransformError;
use crate::imaging::{BackendError, ImageBackend, ImageMetadata, Pipeline};
use crate::request::UploadedImage;

/// Read the upload's metadata and seed a pipeline from its original bytes.
pub fn validate<B: ImageBackend>(
    backend: &B,
    upload: &UploadedImage,
) -> Result<(ImageMetadata, Pipeline), TransformError> {
    let metadata = backend.identify(&upload.data).map_err(|e| match e {
        BackendError::UnsupportedFormat(format) => {
            TransformError::UnsupportedFormat(format!("Unsupported format: {format}"))
        }
        BackendError::Unreadable(detail) | BackendError::ProcessingFailed(detail) => {
            TransformError::UnreadableImage(format!("Invalid image: {detail}"))
        }
    })?;

    if metadata.width == 0 || metadata.height == 0 {
        return Err(TransformError::UnreadableImage(
            "Invalid dimensions".to_string(),
        ));
    }

    Ok((metadata, Pipeline::new(upload.data.clone())))
}
