//! Request dispatcher.
//!
//! The single entry point shared by the HTTP server and the CLI. Every call
//! walks the same fixed steps, each of which can short-circuit:
//!
//! 1. resolve the operation name,
//! 2. require the base upload,
//! 3. parse parameters into a typed request,
//! 4. validate the upload (exactly once),
//! 5. run exactly one handler.
//!
//! The dispatcher holds only the backend, so one instance behind an `Arc`
//! serves every request.

use crate::error::TransformError;
use crate::imaging::ImageBackend;
use crate::operations::{Operation, Request};
use crate::request::{Params, TransformResult, Uploads};
use crate::validate::validate;
use std::time::Instant;
use tracing::{debug, info};

pub struct Dispatcher<B> {
    backend: B,
}

impl<B: ImageBackend> Dispatcher<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn dispatch(&self, operation: &str, params: &Params, uploads: &Uploads) -> TransformResult {
        let started = Instant::now();
        let result = self.run(operation, params, uploads);
        // Failures are logged once, by the caller that turns them into a
        // response or an exit status.
        if let Ok(output) = &result {
            info!(
                operation,
                format = %output.format,
                bytes = output.bytes.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "transform complete"
            );
        }
        result
    }

    fn run(&self, operation: &str, params: &Params, uploads: &Uploads) -> TransformResult {
        let op: Operation = operation.parse()?;

        let image = uploads
            .image
            .as_ref()
            .ok_or_else(|| TransformError::MissingInput(op.missing_input_message().to_string()))?;

        let request = Request::parse(op, params, uploads)?;

        let (metadata, pipeline) = validate(&self.backend, image)?;
        debug!(
            operation = %op,
            width = metadata.width,
            height = metadata.height,
            format = %metadata.format,
            "upload validated"
        );

        request.handle(&self.backend, pipeline, &metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::request::UploadedImage;
    use bytes::Bytes;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().copied().collect()
    }

    fn with_image() -> Uploads {
        Uploads::image(UploadedImage::new(Bytes::from_static(b"img")).with_filename("cat.png"))
    }

    fn dispatcher(backend: MockBackend) -> Dispatcher<MockBackend> {
        Dispatcher::new(backend)
    }

    #[test]
    fn unknown_operation_checked_first() {
        let d = dispatcher(MockBackend::with_metadata(10, 10, Format::Png));
        // No upload either: the operation name wins.
        let err = d
            .dispatch("explode", &Params::new(), &Uploads::default())
            .unwrap_err();
        assert!(matches!(err, TransformError::UnknownOperation(_)));
        assert!(d.backend().get_operations().is_empty());
    }

    #[test]
    fn missing_input_makes_no_codec_calls() {
        let d = dispatcher(MockBackend::with_metadata(10, 10, Format::Png));
        let err = d
            .dispatch("convert", &params(&[("format", "png")]), &Uploads::default())
            .unwrap_err();
        assert_eq!(
            err,
            TransformError::MissingInput("No image file provided".into())
        );
        assert!(d.backend().get_operations().is_empty());
    }

    #[test]
    fn composite_missing_base_message() {
        let d = dispatcher(MockBackend::with_metadata(10, 10, Format::Png));
        let err = d
            .dispatch("composite", &Params::new(), &Uploads::default())
            .unwrap_err();
        assert_eq!(
            err,
            TransformError::MissingInput("No base image provided".into())
        );
    }

    #[test]
    fn unsupported_convert_target_makes_no_codec_calls() {
        let d = dispatcher(MockBackend::with_metadata(10, 10, Format::Png));
        let err = d
            .dispatch("convert", &params(&[("format", "bmp")]), &with_image())
            .unwrap_err();
        assert_eq!(
            err,
            TransformError::UnsupportedFormat("Unsupported format: bmp".into())
        );
        assert!(d.backend().get_operations().is_empty());
    }

    #[test]
    fn invalid_effect_makes_no_codec_calls() {
        let d = dispatcher(MockBackend::with_metadata(10, 10, Format::Png));
        let err = d
            .dispatch("effects", &params(&[("effect", "sparkle")]), &with_image())
            .unwrap_err();
        assert!(matches!(err, TransformError::InvalidOperation(_)));
        assert!(d.backend().get_operations().is_empty());
    }

    #[test]
    fn unreadable_upload_stops_before_handler() {
        let d = dispatcher(MockBackend::new());
        let err = d.dispatch("optimize", &Params::new(), &with_image()).unwrap_err();
        assert!(matches!(err, TransformError::UnreadableImage(_)));
        assert_eq!(d.backend().get_operations(), vec![RecordedOp::Identify]);
    }

    #[test]
    fn validates_once_then_runs_one_handler() {
        let d = dispatcher(MockBackend::with_metadata(64, 32, Format::Gif));
        let out = d
            .dispatch("rotate", &params(&[("angle", "90")]), &with_image())
            .unwrap();

        assert_eq!(out.format, Format::Gif);
        assert_eq!(out.bytes, b"gif:32x64");
        let ops = d.backend().get_operations();
        assert_eq!(
            ops.iter().filter(|op| **op == RecordedOp::Identify).count(),
            1
        );
        assert_eq!(
            ops.iter().filter(|op| matches!(op, RecordedOp::Encode { .. })).count(),
            1
        );
    }

    #[test]
    fn processing_failure_surfaces_message() {
        let d = dispatcher(MockBackend::with_metadata(10, 10, Format::Jpeg).failing_on("decode"));
        let err = d.dispatch("optimize", &Params::new(), &with_image()).unwrap_err();
        assert_eq!(err, TransformError::ProcessingFailed("mock decode failure".into()));
        assert!(!err.is_client_error());
    }

    // =========================================================================
    // Real codec end to end
    // =========================================================================

    #[test]
    fn failures_are_left_to_the_caller_to_log() {
        use std::io::Write;
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured(Arc::new(Mutex::new(Vec::new())));
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        let d = dispatcher(MockBackend::with_metadata(10, 10, Format::Png));
        tracing::subscriber::with_default(subscriber, || {
            d.dispatch("explode", &Params::new(), &with_image())
                .unwrap_err();
            d.dispatch("optimize", &Params::new(), &with_image())
                .unwrap();
        });

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(log.lines().count(), 1, "{log}");
        assert!(log.contains("transform complete"), "{log}");
    }

    mod real_codec {
        use super::*;
        use crate::imaging::RustBackend;
        use crate::test_helpers::{decoded_dimensions, detected_format, encoded};

        fn upload(format: Format, w: u32, h: u32) -> Uploads {
            Uploads::image(UploadedImage::new(encoded(format, w, h)).with_filename("sample.img"))
        }

        #[test]
        fn oversized_resize_fails_without_allocating() {
            let d = Dispatcher::new(RustBackend::new());
            let err = d
                .dispatch(
                    "resize",
                    &params(&[("width", "200000"), ("height", "200000")]),
                    &upload(Format::Png, 4, 4),
                )
                .unwrap_err();
            assert!(matches!(err, TransformError::ProcessingFailed(_)), "{err}");
            assert!(!err.is_client_error());
        }

        #[test]
        fn extreme_effect_values_are_rejected() {
            let d = Dispatcher::new(RustBackend::new());
            for (effect, value) in [("blur", "2000000000"), ("median", "4000000000")] {
                let err = d
                    .dispatch(
                        "effects",
                        &params(&[("effect", effect), ("value", value)]),
                        &upload(Format::Png, 8, 8),
                    )
                    .unwrap_err();
                assert!(matches!(err, TransformError::InvalidParameters(_)), "{effect}: {err}");
            }
        }

        #[test]
        fn wide_median_on_tiny_image_is_quick() {
            let d = Dispatcher::new(RustBackend::new());
            let out = d
                .dispatch(
                    "effects",
                    &params(&[("effect", "median"), ("value", "999")]),
                    &upload(Format::Png, 8, 8),
                )
                .unwrap();
            assert_eq!(decoded_dimensions(&out.bytes), (8, 8));
        }

        #[test]
        fn resize_jpeg_fill() {
            let d = Dispatcher::new(RustBackend::new());
            let out = d
                .dispatch(
                    "resize",
                    &params(&[("width", "50"), ("height", "50"), ("fit", "fill")]),
                    &upload(Format::Jpeg, 100, 100),
                )
                .unwrap();
            assert_eq!(out.content_type(), "image/jpeg");
            assert_eq!(decoded_dimensions(&out.bytes), (50, 50));
        }

        #[test]
        fn every_format_resize_keeps_format() {
            let d = Dispatcher::new(RustBackend::new());
            for format in Format::ALL {
                let out = d
                    .dispatch(
                        "resize",
                        &params(&[("width", "20"), ("height", "10")]),
                        &upload(format, 40, 40),
                    )
                    .unwrap();
                assert_eq!(detected_format(&out.bytes), format, "{format}");
                assert_eq!(decoded_dimensions(&out.bytes), (20, 10), "{format}");
            }
        }

        #[test]
        fn webp_round_trip_keeps_dimensions() {
            let d = Dispatcher::new(RustBackend::new());
            let to_webp = d
                .dispatch("convert", &params(&[("format", "webp")]), &upload(Format::Png, 33, 21))
                .unwrap();
            assert_eq!(detected_format(&to_webp.bytes), Format::WebP);

            let back = d
                .dispatch(
                    "convert",
                    &params(&[("format", "png")]),
                    &Uploads::image(UploadedImage::new(to_webp.bytes)),
                )
                .unwrap();
            assert_eq!(detected_format(&back.bytes), Format::Png);
            assert_eq!(decoded_dimensions(&back.bytes), (33, 21));
        }

        #[test]
        fn optimize_is_idempotent_on_shape() {
            let d = Dispatcher::new(RustBackend::new());
            let once = d
                .dispatch("optimize", &Params::new(), &upload(Format::Jpeg, 48, 36))
                .unwrap();
            let twice = d
                .dispatch(
                    "optimize",
                    &Params::new(),
                    &Uploads::image(UploadedImage::new(once.bytes.clone())),
                )
                .unwrap();
            for out in [&once, &twice] {
                assert_eq!(detected_format(&out.bytes), Format::Jpeg);
                assert_eq!(decoded_dimensions(&out.bytes), (48, 36));
            }
        }

        #[test]
        fn modulate_changes_pixels() {
            let d = Dispatcher::new(RustBackend::new());
            let input = upload(Format::Png, 24, 24);
            let out = d
                .dispatch(
                    "effects",
                    &params(&[
                        ("effect", "modulate"),
                        ("brightness", "1.5"),
                        ("saturation", "0.5"),
                        ("hue", "90"),
                    ]),
                    &input,
                )
                .unwrap();

            let backend = RustBackend::new();
            let before = backend
                .decode(&input.image.as_ref().unwrap().data)
                .unwrap()
                .to_rgba8();
            let after = backend.decode(&out.bytes).unwrap().to_rgba8();
            assert_eq!(before.dimensions(), after.dimensions());
            assert_ne!(before.as_raw(), after.as_raw());
        }

        #[test]
        fn every_effect_succeeds() {
            let d = Dispatcher::new(RustBackend::new());
            let input = upload(Format::Jpeg, 16, 16);
            for name in crate::operations::Effect::NAMES {
                let out = d
                    .dispatch("effect", &params(&[("effect", name)]), &input)
                    .unwrap_or_else(|e| panic!("{name}: {e}"));
                assert_eq!(decoded_dimensions(&out.bytes), (16, 16), "{name}");
            }
        }

        #[test]
        fn garbage_upload_is_client_error() {
            let d = Dispatcher::new(RustBackend::new());
            let err = d
                .dispatch(
                    "optimize",
                    &Params::new(),
                    &Uploads::image(UploadedImage::new(Bytes::from_static(b"hello world"))),
                )
                .unwrap_err();
            assert!(matches!(err, TransformError::UnreadableImage(_)));
        }
    }
}
