//! # imgforge
//!
//! A stateless HTTP service that transforms uploaded images: resize, format
//! conversion, rotation, re-encode optimization, pixel effects and
//! compositing. Each request carries its image; nothing is stored.
//!
//! # Architecture: One Dispatch Per Request
//!
//! Every operation, from HTTP or the `apply` CLI command, goes through the
//! same fixed path:
//!
//! ```text
//! operation name ─► typed request ─► validate upload ─► handler ─► encode
//!                   (params only)    (header only)      (queue)    (policy)
//! ```
//!
//! - **Parse before decode**: bad parameters and unsupported targets are
//!   rejected before the codec reads a byte.
//! - **Deferred pipeline**: handlers only queue transform descriptors; the
//!   image is decoded once and encoded once, at the end.
//! - **One policy per format**: quality and compression are never chosen per
//!   request. See [`policy`].
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`format`] | The closed set of supported formats and their MIME types |
//! | [`policy`] | Fixed encode options per output format |
//! | [`imaging`] | Codec trait, pure-Rust backend, transform pipeline |
//! | [`validate`] | Header-only upload validation |
//! | [`operations`] | Parameter parsing and the six operation handlers |
//! | [`dispatch`] | The single entry point tying the above together |
//! | [`request`] | Transport-neutral params, uploads and outputs |
//! | [`error`] | `TransformError` (client vs. server) and `UploadError` |
//! | [`server`] | axum routes, multipart limits, CORS, request logging |
//! | [`config`] | Layered TOML configuration |
//!
//! # Design Decisions
//!
//! ## Pure-Rust Codecs
//!
//! The [`imaging`] module uses the `image` crate for JPEG, PNG, WebP and GIF,
//! `rav1e` (via `image`) for AVIF encoding and `rav1d` for AVIF decoding. No
//! system libraries are linked, so the binary runs anywhere it is copied.
//!
//! ## Codec Behind a Trait
//!
//! Handlers and the dispatcher talk to [`imaging::ImageBackend`] only. Unit
//! tests swap in a recording mock and assert on the exact call sequence, e.g.
//! that a rejected convert target makes no codec call at all.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod imaging;
pub mod operations;
pub mod policy;
pub mod request;
pub mod server;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_helpers;
