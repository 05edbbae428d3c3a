//! Transport-neutral request and response values.
//!
//! The HTTP layer and the `apply` CLI command both build these, so the
//! dispatcher never sees axum or file-system types.

use crate::error::TransformError;
use crate::format::Format;
use bytes::Bytes;
use std::collections::HashMap;

/// String form fields of one request.
///
/// Numeric accessors are lenient the way form clients expect: leading
/// whitespace is skipped and trailing junk after a number is ignored
/// (`"50px"` reads as 50).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// The trimmed value, or `None` when absent or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Leading integer of the value.
    pub fn int(&self, key: &str) -> Option<i64> {
        let value = self.get(key)?;
        let end = numeric_prefix(value, false);
        value[..end].parse().ok()
    }

    /// Leading decimal number of the value.
    pub fn float(&self, key: &str) -> Option<f32> {
        let value = self.get(key)?;
        let end = numeric_prefix(value, true);
        value[..end].parse::<f32>().ok().filter(|v| v.is_finite())
    }
}

/// Byte length of the `[+-]digits[.digits]` prefix of `s`.
fn numeric_prefix(s: &str, allow_fraction: bool) -> usize {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if allow_fraction && end < bytes.len() && bytes[end] == b'.' {
        let mut frac = end + 1;
        while frac < bytes.len() && bytes[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 {
            end = frac;
        }
    }
    end
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One uploaded file, owned by its request.
#[derive(Debug, Clone, Default)]
pub struct UploadedImage {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

impl UploadedImage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Original filename up to the first `.`; `None` when that is empty.
    pub fn stem(&self) -> Option<&str> {
        self.filename
            .as_deref()
            .and_then(|name| name.split('.').next())
            .filter(|stem| !stem.is_empty())
    }
}

/// The files of one request, by form field.
#[derive(Debug, Clone, Default)]
pub struct Uploads {
    /// Field `image`: the base image for every operation.
    pub image: Option<UploadedImage>,
    /// Field `overlay`: composite only.
    pub overlay: Option<UploadedImage>,
}

impl Uploads {
    pub fn image(image: UploadedImage) -> Self {
        Self {
            image: Some(image),
            overlay: None,
        }
    }
}

/// Encoded result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    /// Format of the final encode.
    pub format: Format,
    /// Suggested download name, set by convert.
    pub filename: Option<String>,
}

impl TransformOutput {
    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

pub type TransformResult = Result<TransformOutput, TransformError>;
