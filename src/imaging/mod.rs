//! Image processing, pure Rust and statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader` / `avif-parse` |
//! | **Decode** | `image` codecs, `rav1d` for AVIF |
//! | **Transforms** | `image::imageops` + per-pixel color math |
//! | **Encode** | `image` codecs, `png` + `color_quant` for palette PNG |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for geometry and color math (unit testable)
//! - **Parameters**: Data structures describing transforms
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Pipeline**: Deferred decode → transforms → encode chain

mod avif;
pub mod backend;
mod calculations;
mod params;
pub mod pipeline;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend, ImageMetadata};
pub use params::{
    Fit, MAX_MEDIAN_WINDOW, MAX_SIGMA, Modulation, Position, Quality, ResizeParams, Rgba,
    RotateParams, TINT_COLOR, Transform,
};
pub use pipeline::Pipeline;
pub use rust_backend::RustBackend;
