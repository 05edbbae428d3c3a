//! Operation handlers.
//!
//! Each operation is parsed from form fields into a typed [`Request`] first,
//! so bad parameters are reported without touching the codec. A parsed
//! request then queues its transforms on the validated [`Pipeline`] and ends
//! with exactly one encode under the format policy.
//!
//! | Operation | Transforms | Output format |
//! |---|---|---|
//! | resize | resize | input |
//! | convert | none | requested |
//! | rotate | rotate | input |
//! | optimize | none | input |
//! | effect | one effect | input |
//! | composite | overlay, if uploaded | input |

use crate::error::TransformError;
use crate::format::Format;
use crate::imaging::{
    Fit, ImageBackend, ImageMetadata, MAX_MEDIAN_WINDOW, MAX_SIGMA, Modulation, Pipeline,
    Position, ResizeParams, Rgba, RotateParams, TINT_COLOR, Transform,
};
use crate::request::{Params, TransformOutput, TransformResult, Uploads};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Default radius for blur and sharpen.
const DEFAULT_SIGMA: f32 = 5.0;
/// Default window for median.
const DEFAULT_MEDIAN: u32 = 3;
/// Basename for converted files uploaded without a name.
const FALLBACK_STEM: &str = "image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Resize,
    Convert,
    Rotate,
    Optimize,
    Effect,
    Composite,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Resize,
        Operation::Convert,
        Operation::Rotate,
        Operation::Optimize,
        Operation::Effect,
        Operation::Composite,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Convert => "convert",
            Operation::Rotate => "rotate",
            Operation::Optimize => "optimize",
            Operation::Effect => "effect",
            Operation::Composite => "composite",
        }
    }

    /// Message when the base image is absent.
    pub fn missing_input_message(self) -> &'static str {
        match self {
            Operation::Composite => "No base image provided",
            _ => "No image file provided",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resize" => Ok(Operation::Resize),
            "convert" => Ok(Operation::Convert),
            "rotate" => Ok(Operation::Rotate),
            "optimize" => Ok(Operation::Optimize),
            // The HTTP route is plural.
            "effect" | "effects" => Ok(Operation::Effect),
            "composite" => Ok(Operation::Composite),
            other => Err(TransformError::UnknownOperation(format!(
                "Unknown operation: {other}"
            ))),
        }
    }
}

/// One pixel-level effect with its resolved parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    Blur(f32),
    Sharpen(f32),
    Modulate(Modulation),
    Grayscale,
    Sepia,
    Negate,
    Tint,
    Normalize,
    Median(u32),
}

impl Effect {
    pub const NAMES: [&'static str; 9] = [
        "blur",
        "sharpen",
        "modulate",
        "grayscale",
        "sepia",
        "negate",
        "tint",
        "normalize",
        "median",
    ];

    pub fn parse(params: &Params) -> Result<Self, TransformError> {
        let effect = match params.get("effect") {
            Some("blur") => Effect::Blur(sigma(params)?),
            Some("sharpen") => Effect::Sharpen(sigma(params)?),
            Some("modulate") => Effect::Modulate(modulation(params)?),
            Some("grayscale") => Effect::Grayscale,
            Some("sepia") => Effect::Sepia,
            Some("negate") => Effect::Negate,
            Some("tint") => Effect::Tint,
            Some("normalize") => Effect::Normalize,
            Some("median") => {
                let size = params
                    .int("value")
                    .filter(|v| *v != 0)
                    .unwrap_or(DEFAULT_MEDIAN as i64)
                    .max(1);
                if size > MAX_MEDIAN_WINDOW as i64 {
                    return Err(TransformError::InvalidParameters(format!(
                        "Invalid value: median size {size} exceeds {MAX_MEDIAN_WINDOW}"
                    )));
                }
                Effect::Median(size as u32)
            }
            _ => {
                return Err(TransformError::InvalidOperation(
                    "Invalid effect specified".to_string(),
                ));
            }
        };
        Ok(effect)
    }

    fn transform(self) -> Transform {
        match self {
            Effect::Blur(sigma) => Transform::Blur { sigma },
            Effect::Sharpen(sigma) => Transform::Sharpen { sigma },
            Effect::Modulate(m) => Transform::Modulate(m),
            Effect::Grayscale => Transform::Grayscale,
            Effect::Sepia => Transform::Sepia,
            Effect::Negate => Transform::Negate,
            Effect::Tint => Transform::Tint(TINT_COLOR),
            Effect::Normalize => Transform::Normalize,
            Effect::Median(size) => Transform::Median { size },
        }
    }
}

/// Zero and unparsable values take the default; negatives clamp to 0.
fn sigma(params: &Params) -> Result<f32, TransformError> {
    match params.int("value") {
        None | Some(0) => Ok(DEFAULT_SIGMA),
        Some(v) if v as f64 > MAX_SIGMA as f64 => Err(TransformError::InvalidParameters(
            format!("Invalid value: sigma {v} exceeds {MAX_SIGMA}"),
        )),
        Some(v) => Ok(v.max(0) as f32),
    }
}

fn modulation(params: &Params) -> Result<Modulation, TransformError> {
    let factor = |key: &str| -> Result<f32, TransformError> {
        match params.float(key) {
            None => Ok(1.0),
            Some(v) if v == 0.0 => Ok(1.0),
            Some(v) if v < 0.0 => Err(TransformError::InvalidParameters(format!(
                "Invalid {key}: must not be negative"
            ))),
            Some(v) => Ok(v),
        }
    };
    let hue = params
        .int("hue")
        .unwrap_or(0)
        .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    Ok(Modulation {
        brightness: factor("brightness")?,
        saturation: factor("saturation")?,
        hue,
    })
}

/// A fully parsed operation.
#[derive(Debug, Clone)]
pub enum Request {
    Resize {
        /// Raw requested size; resolved against the image in the handler.
        width: Option<i64>,
        height: Option<i64>,
        fit: Fit,
        position: Position,
    },
    Convert {
        target: Format,
        /// Extension as requested, so `jpg` stays `jpg` in the filename.
        extension: String,
        stem: String,
    },
    Rotate(RotateParams),
    Optimize,
    Effect(Effect),
    Composite {
        overlay: Option<Bytes>,
    },
}

impl Request {
    pub fn parse(
        operation: Operation,
        params: &Params,
        uploads: &Uploads,
    ) -> Result<Self, TransformError> {
        let request = match operation {
            Operation::Resize => Request::Resize {
                width: params.int("width"),
                height: params.int("height"),
                fit: parse_or_default(params, "fit")?,
                position: parse_or_default(params, "position")?,
            },
            Operation::Convert => {
                let requested = params.get("format").unwrap_or_default();
                let target: Format = requested.parse().map_err(|_| {
                    let shown = if requested.is_empty() { "none" } else { requested };
                    TransformError::UnsupportedFormat(format!("Unsupported format: {shown}"))
                })?;
                let stem = uploads
                    .image
                    .as_ref()
                    .and_then(|upload| upload.stem())
                    .unwrap_or(FALLBACK_STEM);
                Request::Convert {
                    target,
                    extension: requested.to_ascii_lowercase(),
                    stem: stem.to_string(),
                }
            }
            Operation::Rotate => Request::Rotate(RotateParams {
                angle: params.int("angle").unwrap_or(0),
                background: match params.get("background") {
                    Some(color) => color
                        .parse()
                        .map_err(TransformError::InvalidParameters)?,
                    None => Rgba::WHITE,
                },
            }),
            Operation::Optimize => Request::Optimize,
            Operation::Effect => Request::Effect(Effect::parse(params)?),
            Operation::Composite => Request::Composite {
                overlay: uploads.overlay.as_ref().map(|o| o.data.clone()),
            },
        };
        Ok(request)
    }

    /// Queue this request's transforms and run the single encode.
    pub fn handle<B: ImageBackend>(
        self,
        backend: &B,
        mut pipeline: Pipeline,
        metadata: &ImageMetadata,
    ) -> TransformResult {
        let input = metadata.format;
        match self {
            Request::Resize {
                width,
                height,
                fit,
                position,
            } => {
                let (width, height) = resolve_dimensions(width, height, metadata)?;
                pipeline.push(Transform::Resize(ResizeParams {
                    width,
                    height,
                    fit,
                    position,
                    background: Rgba::WHITE,
                }));
                finish(backend, pipeline, input, None)
            }
            Request::Convert {
                target,
                extension,
                stem,
            } => {
                let filename = format!("{stem}.{extension}");
                finish(backend, pipeline, target, Some(filename)).map_err(|e| match e {
                    TransformError::ProcessingFailed(msg) => TransformError::ProcessingFailed(
                        format!("Failed to convert image: {msg}"),
                    ),
                    other => other,
                })
            }
            Request::Rotate(params) => {
                pipeline.push(Transform::Rotate(params));
                finish(backend, pipeline, input, None)
            }
            Request::Optimize => finish(backend, pipeline, input, None),
            Request::Effect(effect) => {
                pipeline.push(effect.transform());
                finish(backend, pipeline, input, None)
            }
            Request::Composite { overlay } => {
                if let Some(overlay) = overlay {
                    pipeline.push(Transform::Composite { overlay });
                }
                finish(backend, pipeline, input, None)
            }
        }
    }
}

fn parse_or_default<T>(params: &Params, key: &str) -> Result<T, TransformError>
where
    T: FromStr<Err = String> + Default,
{
    match params.get(key) {
        Some(value) => value.parse().map_err(TransformError::InvalidParameters),
        None => Ok(T::default()),
    }
}

/// Absent, unparsable and non-positive sizes fall back to the image's own.
fn resolve_dimensions(
    width: Option<i64>,
    height: Option<i64>,
    metadata: &ImageMetadata,
) -> Result<(u32, u32), TransformError> {
    let width = width.filter(|w| *w > 0).unwrap_or(metadata.width as i64);
    let height = height.filter(|h| *h > 0).unwrap_or(metadata.height as i64);
    if width <= 0 || height <= 0 {
        return Err(TransformError::InvalidParameters(
            "Invalid dimensions".to_string(),
        ));
    }
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(TransformError::InvalidParameters(format!(
            "Invalid dimensions: {width}x{height} is too large"
        ))),
    }
}

fn finish<B: ImageBackend>(
    backend: &B,
    pipeline: Pipeline,
    format: Format,
    filename: Option<String>,
) -> TransformResult {
    let bytes = pipeline.encode(backend, format)?;
    Ok(TransformOutput {
        bytes,
        format,
        filename,
    })
}
