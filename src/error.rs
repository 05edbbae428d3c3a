//! Request-level error types.
//!
//! [`TransformError`] is the single failure side of every dispatch. Its
//! `Display` is exactly the message a client sees in `{"error": ...}`.
//! Codec failures arrive as [`BackendError`] and are folded into
//! [`TransformError::ProcessingFailed`] at the handler boundary.

use crate::imaging::BackendError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Required upload absent.
    #[error("{0}")]
    MissingInput(String),
    /// Header could not be read, or the image has a zero dimension.
    #[error("{0}")]
    UnreadableImage(String),
    #[error("{0}")]
    InvalidParameters(String),
    /// Format outside the closed set, as input or as convert target.
    #[error("{0}")]
    UnsupportedFormat(String),
    /// Effect name outside the known set.
    #[error("{0}")]
    InvalidOperation(String),
    #[error("{0}")]
    UnknownOperation(String),
    /// Codec failure during decode, transform or encode.
    #[error("{0}")]
    ProcessingFailed(String),
}

impl TransformError {
    /// True for everything the client can fix (HTTP 400).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, TransformError::ProcessingFailed(_))
    }

    /// Stable variant name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransformError::MissingInput(_) => "missing_input",
            TransformError::UnreadableImage(_) => "unreadable_image",
            TransformError::InvalidParameters(_) => "invalid_parameters",
            TransformError::UnsupportedFormat(_) => "unsupported_format",
            TransformError::InvalidOperation(_) => "invalid_operation",
            TransformError::UnknownOperation(_) => "unknown_operation",
            TransformError::ProcessingFailed(_) => "processing_failed",
        }
    }
}

impl From<BackendError> for TransformError {
    fn from(err: BackendError) -> Self {
        TransformError::ProcessingFailed(err.to_string())
    }
}

/// Failure while reading the multipart body, before any dispatch.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File too large")]
    FileTooLarge,
    #[error("{0}")]
    Multipart(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_client_message() {
        let err = TransformError::MissingInput("No image file provided".into());
        assert_eq!(err.to_string(), "No image file provided");
    }

    #[test]
    fn only_processing_failures_are_server_errors() {
        assert!(!TransformError::ProcessingFailed("boom".into()).is_client_error());
        for err in [
            TransformError::MissingInput(String::new()),
            TransformError::UnreadableImage(String::new()),
            TransformError::InvalidParameters(String::new()),
            TransformError::UnsupportedFormat(String::new()),
            TransformError::InvalidOperation(String::new()),
            TransformError::UnknownOperation(String::new()),
        ] {
            assert!(err.is_client_error(), "{}", err.kind());
        }
    }

    #[test]
    fn backend_errors_become_processing_failures() {
        let err: TransformError = BackendError::ProcessingFailed("encoder exploded".into()).into();
        assert_eq!(
            err,
            TransformError::ProcessingFailed("encoder exploded".into())
        );
    }

    #[test]
    fn upload_error_messages() {
        assert_eq!(UploadError::FileTooLarge.to_string(), "File too large");
        assert_eq!(
            UploadError::Multipart("Unexpected end of form".into()).to_string(),
            "Unexpected end of form"
        );
    }
}
