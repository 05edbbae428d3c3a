//! Deferred transform pipeline.
//!
//! A [`Pipeline`] is seeded from the original encoded buffer and accumulates
//! [`Transform`] descriptors. Nothing is decoded until [`Pipeline::encode`],
//! which decodes once, replays the transforms in order, and encodes with the
//! format's policy. One pipeline belongs to one request.

use super::backend::{BackendError, ImageBackend};
use super::params::Transform;
use crate::format::Format;
use crate::policy::policy_for;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Pipeline {
    source: Bytes,
    transforms: Vec<Transform>,
}

impl Pipeline {
    pub fn new(source: Bytes) -> Self {
        Self {
            source,
            transforms: Vec::new(),
        }
    }

    /// Queue a transform. Transforms run in insertion order.
    pub fn push(&mut self, transform: Transform) -> &mut Self {
        self.transforms.push(transform);
        self
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Decode, apply every queued transform, and encode as `format`.
    pub fn encode<B: ImageBackend>(self, backend: &B, format: Format) -> Result<Vec<u8>, BackendError> {
        let mut image = backend.decode(&self.source)?;
        for transform in &self.transforms {
            image = apply(backend, image, transform)?;
        }
        backend.encode(&image, format, policy_for(format))
    }
}

fn apply<B: ImageBackend>(
    backend: &B,
    image: B::Image,
    transform: &Transform,
) -> Result<B::Image, BackendError> {
    match transform {
        Transform::Resize(params) => backend.resize(image, params),
        Transform::Rotate(params) => backend.rotate(image, params),
        Transform::Blur { sigma } => backend.blur(image, *sigma),
        Transform::Sharpen { sigma } => backend.sharpen(image, *sigma),
        Transform::Modulate(modulation) => backend.modulate(image, modulation),
        Transform::Grayscale => backend.grayscale(image),
        Transform::Sepia => backend.sepia(image),
        Transform::Negate => backend.negate(image),
        Transform::Tint(color) => backend.tint(image, *color),
        Transform::Normalize => backend.normalize(image),
        Transform::Median { size } => backend.median(image, *size),
        Transform::Composite { overlay } => backend.composite(image, overlay),
    }
}
