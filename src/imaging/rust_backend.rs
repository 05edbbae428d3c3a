//! Pure Rust codec backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify / decode (JPEG, PNG, WebP, GIF) | `image::ImageReader` with guessed format |
//! | Identify / decode (AVIF) | `avif-parse` + `rav1d`, see [`avif`](super::avif) |
//! | Resize | `image::imageops` with `Lanczos3`, crop/pad per fit mode |
//! | Rotate | lossless for right angles, bilinear resample otherwise |
//! | Blur / sharpen | `DynamicImage::blur` / `DynamicImage::unsharpen` |
//! | Modulate, sepia, tint, normalize, median | per-pixel loops over RGBA8 |
//! | Composite | `image::imageops::overlay` |
//! | Encode → JPEG, WebP, AVIF, GIF | `image::codecs::*` |
//! | Encode → palette PNG | `color_quant::NeuQuant` + `png` indexed writer |
//!
//! WebP output comes from the pure-Rust lossless encoder; for lossy policies
//! the color channels are quantized first according to the policy quality.

use super::avif;
use super::backend::{BackendError, ImageBackend, ImageMetadata};
use super::calculations::{
    ResizePlan, luma, modulate_pixel, odd_window, plan_resize, rotated_bounds, sepia_pixel,
    stretch, tint_pixel,
};
use super::params::{
    MAX_MEDIAN_WINDOW, MAX_SIGMA, Modulation, Quality, ResizeParams, Rgba, RotateParams,
};
use crate::format::Format;
use crate::policy::EncodeOptions;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbaImage};
use std::io::Cursor;

/// AVIF encoder speed (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 6;
/// GIF quantizer speed (1 = best, 30 = fastest).
const GIF_SPEED: i32 = 10;
/// NeuQuant sampling factor for palette PNGs (1 = best, 30 = fastest).
const PALETTE_SAMPLE_FACTOR: i32 = 10;
/// Largest RGBA canvas a transform may allocate; matches `image::Limits`'
/// default `max_alloc`.
const MAX_CANVAS_BYTES: u64 = 512 * 1024 * 1024;
/// Upper bound on median sample reads (pixels × window area × channels).
const MEDIAN_WORK_BUDGET: u64 = 1 << 32;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| BackendError::Unreadable(e.to_string()))
}

/// Detect the container format from magic bytes.
fn detect_format(data: &[u8]) -> Result<Format, BackendError> {
    if avif::sniff(data) {
        return Ok(Format::Avif);
    }
    match reader(data)?.format() {
        Some(detected) => Format::from_image_format(detected)
            .ok_or_else(|| BackendError::UnsupportedFormat(format!("{detected:?}").to_lowercase())),
        None => Err(BackendError::Unreadable(
            "Input buffer contains unsupported image format".to_string(),
        )),
    }
}

fn decode_image(data: &[u8]) -> Result<DynamicImage, BackendError> {
    if avif::sniff(data) {
        return avif::decode(data);
    }
    reader(data)?
        .decode()
        .map_err(|e| BackendError::ProcessingFailed(format!("Failed to decode image: {e}")))
}

/// Map every RGB triple of the image, keeping alpha.
fn map_rgb(image: DynamicImage, f: impl Fn([u8; 3]) -> [u8; 3]) -> DynamicImage {
    let mut rgba = image.into_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let [r, g, b] = f([r, g, b]);
        pixel.0 = [r, g, b, a];
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Bilinear sample at fractional source coordinates; outside pixels read as `bg`.
fn sample_bilinear(src: &RgbaImage, fx: f32, fy: f32, bg: [u8; 4]) -> [u8; 4] {
    let (x0, y0) = (fx.floor(), fy.floor());
    let (tx, ty) = (fx - x0, fy - y0);
    let at = |x: f32, y: f32| -> [f32; 4] {
        if x < 0.0 || y < 0.0 || x >= src.width() as f32 || y >= src.height() as f32 {
            bg.map(|c| c as f32)
        } else {
            src.get_pixel(x as u32, y as u32).0.map(|c| c as f32)
        }
    };
    let (p00, p10) = (at(x0, y0), at(x0 + 1.0, y0));
    let (p01, p11) = (at(x0, y0 + 1.0), at(x0 + 1.0, y0 + 1.0));

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] + (p10[c] - p00[c]) * tx;
        let bottom = p01[c] + (p11[c] - p01[c]) * tx;
        out[c] = (top + (bottom - top) * ty).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Rotate clockwise by an arbitrary angle onto an expanded canvas.
fn rotate_arbitrary(
    image: &DynamicImage,
    degrees: f64,
    background: Rgba,
) -> Result<DynamicImage, BackendError> {
    let (nw, nh) = rotated_bounds(image.width(), image.height(), degrees);
    check_canvas(nw, nh)?;
    let src = image.to_rgba8();
    let (w, h) = src.dimensions();
    let (sin, cos) = {
        let r = degrees.to_radians();
        (r.sin() as f32, r.cos() as f32)
    };
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (ncx, ncy) = (nw as f32 / 2.0, nh as f32 / 2.0);

    let out = RgbaImage::from_fn(nw, nh, |x, y| {
        let dx = x as f32 + 0.5 - ncx;
        let dy = y as f32 + 0.5 - ncy;
        // Inverse of a clockwise turn in y-down coordinates.
        let sx = dx * cos + dy * sin + cx - 0.5;
        let sy = -dx * sin + dy * cos + cy - 0.5;
        image::Rgba(sample_bilinear(&src, sx, sy, background.0))
    });
    Ok(DynamicImage::ImageRgba8(out))
}

/// Refuse canvases whose RGBA buffer would exceed [`MAX_CANVAS_BYTES`].
fn check_canvas(width: u32, height: u32) -> Result<(), BackendError> {
    let bytes = (width as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_mul(4));
    match bytes {
        Some(bytes) if bytes <= MAX_CANVAS_BYTES => Ok(()),
        _ => Err(BackendError::ProcessingFailed(format!(
            "Output {width}x{height} exceeds the {} MiB memory limit",
            MAX_CANVAS_BYTES / (1024 * 1024)
        ))),
    }
}

/// Percentile bounds of the luma histogram.
fn luma_bounds(rgba: &RgbaImage, low_pct: f32, high_pct: f32) -> (u8, u8) {
    let mut histogram = [0u64; 256];
    for p in rgba.pixels() {
        histogram[luma(p[0], p[1], p[2]).round() as usize] += 1;
    }
    let total = rgba.pixels().len() as f32;
    let find = |pct: f32| {
        let target = (total * pct).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (value, count) in histogram.iter().enumerate() {
            seen += count;
            if seen >= target {
                return value as u8;
            }
        }
        255
    };
    (find(low_pct), find(high_pct))
}

/// Windows wider than the image are capped at its larger side.
fn median_filter(image: &DynamicImage, size: u32) -> Result<DynamicImage, BackendError> {
    if size > MAX_MEDIAN_WINDOW {
        return Err(BackendError::ProcessingFailed(format!(
            "Median window {size} exceeds {MAX_MEDIAN_WINDOW}"
        )));
    }
    let (w, h) = (image.width(), image.height());
    let side = odd_window(size).min(odd_window(w.max(h)));
    let area = side as u64 * side as u64;
    let work = (w as u64)
        .checked_mul(h as u64)
        .and_then(|pixels| pixels.checked_mul(area))
        .and_then(|reads| reads.checked_mul(4));
    if !work.is_some_and(|reads| reads <= MEDIAN_WORK_BUDGET) {
        return Err(BackendError::ProcessingFailed(format!(
            "Median window {size} is too large for a {w}x{h} image"
        )));
    }

    let src = image.to_rgba8();
    let radius = (side / 2) as i64;
    let mut window: Vec<u8> = Vec::with_capacity(area as usize);

    let out = RgbaImage::from_fn(w, h, |x, y| {
        let mut px = [0u8; 4];
        for (c, channel) in px.iter_mut().enumerate() {
            window.clear();
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    // Edge pixels repeat outward.
                    let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                    window.push(src.get_pixel(sx, sy)[c]);
                }
            }
            let mid = window.len() / 2;
            *channel = *window.select_nth_unstable(mid).1;
        }
        image::Rgba(px)
    });
    Ok(DynamicImage::ImageRgba8(out))
}

fn check_sigma(sigma: f32) -> Result<(), BackendError> {
    if sigma.is_finite() && sigma <= MAX_SIGMA {
        Ok(())
    } else {
        Err(BackendError::ProcessingFailed(format!(
            "Sigma {sigma} exceeds {MAX_SIGMA}"
        )))
    }
}

fn encode_failed(format: Format) -> impl Fn(image::ImageError) -> BackendError {
    move |e| BackendError::ProcessingFailed(format!("{} encode failed: {e}", format.name()))
}

fn png_compression(level: Option<u8>) -> CompressionType {
    match level {
        Some(0..=2) => CompressionType::Fast,
        Some(7..) => CompressionType::Best,
        _ => CompressionType::Default,
    }
}

fn palette_quantizer(rgba: &RgbaImage, colors: Option<u16>) -> color_quant::NeuQuant {
    let colors = colors.unwrap_or(256).clamp(2, 256) as usize;
    color_quant::NeuQuant::new(PALETTE_SAMPLE_FACTOR, colors, rgba.as_raw())
}

/// Snap every pixel to a palette of at most `colors` entries.
fn reduce_palette(rgba: &mut RgbaImage, colors: u16) {
    let quantizer = palette_quantizer(rgba, Some(colors));
    let map = quantizer.color_map_rgba();
    for pixel in rgba.pixels_mut() {
        let i = quantizer.index_of(&pixel.0) * 4;
        pixel.0.copy_from_slice(&map[i..i + 4]);
    }
}

/// Quantize to an indexed palette and write an 8-bit indexed PNG.
fn encode_palette_png(image: &DynamicImage, options: &EncodeOptions) -> Result<Vec<u8>, BackendError> {
    let rgba = image.to_rgba8();
    let (w, h) = rgba.dimensions();
    let quantizer = palette_quantizer(&rgba, options.colors);
    let indices: Vec<u8> = rgba
        .pixels()
        .map(|p| quantizer.index_of(&p.0) as u8)
        .collect();
    let map = quantizer.color_map_rgba();
    let palette: Vec<u8> = map.chunks_exact(4).flat_map(|c| [c[0], c[1], c[2]]).collect();
    let alphas: Vec<u8> = map.chunks_exact(4).map(|c| c[3]).collect();

    let png_failed = |e: png::EncodingError| {
        BackendError::ProcessingFailed(format!("png encode failed: {e}"))
    };
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_palette(palette);
        if alphas.iter().any(|&a| a < 255) {
            encoder.set_trns(alphas);
        }
        encoder.set_compression(match png_compression(options.compression_level) {
            CompressionType::Best => png::Compression::Best,
            CompressionType::Fast => png::Compression::Fast,
            _ => png::Compression::Default,
        });
        let mut writer = encoder.write_header().map_err(png_failed)?;
        writer.write_image_data(&indices).map_err(png_failed)?;
        writer.finish().map_err(png_failed)?;
    }
    Ok(out)
}

/// Reduce each color channel to fewer levels so the lossless encoder
/// compresses harder. Lower quality means fewer levels.
fn quantize_channels(rgba: &mut RgbaImage, quality: Quality) {
    if quality.value() >= 100 {
        return;
    }
    let q = (quality.value().max(1) as f32) / 100.0;
    let levels = (2.0 + q * q * 254.0).round().clamp(2.0, 256.0);
    let step = 255.0 / (levels - 1.0);
    for pixel in rgba.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = ((*channel as f32 / step).round() * step).round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl ImageBackend for RustBackend {
    type Image = DynamicImage;

    fn identify(&self, data: &[u8]) -> Result<ImageMetadata, BackendError> {
        let format = detect_format(data)?;
        let (width, height) = match format {
            Format::Avif => avif::dimensions(data)?,
            _ => reader(data)?
                .into_dimensions()
                .map_err(|e| BackendError::Unreadable(format!("Failed to read dimensions: {e}")))?,
        };
        Ok(ImageMetadata {
            width,
            height,
            format,
        })
    }

    fn decode(&self, data: &[u8]) -> Result<DynamicImage, BackendError> {
        decode_image(data)
    }

    fn resize(&self, image: DynamicImage, params: &ResizeParams) -> Result<DynamicImage, BackendError> {
        if params.width == 0 || params.height == 0 {
            return Err(BackendError::ProcessingFailed(format!(
                "Invalid resize target {}x{}",
                params.width, params.height
            )));
        }
        let plan = plan_resize((image.width(), image.height()), params);
        match plan {
            ResizePlan::Scale { width, height } => check_canvas(width, height)?,
            ResizePlan::Crop { scaled, .. } => check_canvas(scaled.0, scaled.1)?,
            ResizePlan::Pad {
                scaled,
                width,
                height,
                ..
            } => {
                check_canvas(scaled.0, scaled.1)?;
                check_canvas(width, height)?;
            }
        }
        let resized = match plan {
            ResizePlan::Scale { width, height } => {
                image.resize_exact(width, height, FilterType::Lanczos3)
            }
            ResizePlan::Crop {
                scaled,
                x,
                y,
                width,
                height,
            } => image
                .resize_exact(scaled.0, scaled.1, FilterType::Lanczos3)
                .crop_imm(x, y, width, height),
            ResizePlan::Pad {
                scaled,
                x,
                y,
                width,
                height,
            } => {
                let inner = image.resize_exact(scaled.0, scaled.1, FilterType::Lanczos3);
                let mut canvas =
                    RgbaImage::from_pixel(width, height, image::Rgba(params.background.0));
                image::imageops::overlay(&mut canvas, &inner.to_rgba8(), x as i64, y as i64);
                DynamicImage::ImageRgba8(canvas)
            }
        };
        Ok(resized)
    }

    fn rotate(&self, image: DynamicImage, params: &RotateParams) -> Result<DynamicImage, BackendError> {
        Ok(match params.angle.rem_euclid(360) {
            0 => image,
            90 => image.rotate90(),
            180 => image.rotate180(),
            270 => image.rotate270(),
            degrees => rotate_arbitrary(&image, degrees as f64, params.background)?,
        })
    }

    fn blur(&self, image: DynamicImage, sigma: f32) -> Result<DynamicImage, BackendError> {
        check_sigma(sigma)?;
        if sigma <= 0.0 {
            return Ok(image);
        }
        Ok(image.blur(sigma))
    }

    fn sharpen(&self, image: DynamicImage, sigma: f32) -> Result<DynamicImage, BackendError> {
        check_sigma(sigma)?;
        if sigma <= 0.0 {
            return Ok(image);
        }
        Ok(image.unsharpen(sigma, 1))
    }

    fn modulate(&self, image: DynamicImage, modulation: &Modulation) -> Result<DynamicImage, BackendError> {
        Ok(map_rgb(image, |px| modulate_pixel(px, modulation)))
    }

    fn grayscale(&self, image: DynamicImage) -> Result<DynamicImage, BackendError> {
        Ok(image.grayscale())
    }

    fn sepia(&self, image: DynamicImage) -> Result<DynamicImage, BackendError> {
        Ok(map_rgb(image, sepia_pixel))
    }

    fn negate(&self, mut image: DynamicImage) -> Result<DynamicImage, BackendError> {
        image.invert();
        Ok(image)
    }

    fn tint(&self, image: DynamicImage, color: Rgba) -> Result<DynamicImage, BackendError> {
        Ok(map_rgb(image, |px| tint_pixel(px, color)))
    }

    fn normalize(&self, image: DynamicImage) -> Result<DynamicImage, BackendError> {
        let rgba = image.into_rgba8();
        let (low, high) = luma_bounds(&rgba, 0.01, 0.99);
        Ok(map_rgb(DynamicImage::ImageRgba8(rgba), |px| {
            px.map(|c| stretch(c, low, high))
        }))
    }

    fn median(&self, image: DynamicImage, size: u32) -> Result<DynamicImage, BackendError> {
        median_filter(&image, size)
    }

    fn composite(&self, image: DynamicImage, overlay: &[u8]) -> Result<DynamicImage, BackendError> {
        let top = decode_image(overlay).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode overlay: {e}"))
        })?;
        let mut base = image.into_rgba8();
        let x = (base.width() as i64 - top.width() as i64) / 2;
        let y = (base.height() as i64 - top.height() as i64) / 2;
        image::imageops::overlay(&mut base, &top.to_rgba8(), x, y);
        Ok(DynamicImage::ImageRgba8(base))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: Format,
        options: &EncodeOptions,
    ) -> Result<Vec<u8>, BackendError> {
        let quality = |default: u32| options.quality.unwrap_or(Quality::new(default)).as_u8();
        let mut out = Vec::new();

        match format {
            Format::Jpeg => {
                // JPEG carries no alpha channel.
                let flat = if image.color().has_color() {
                    DynamicImage::ImageRgb8(image.to_rgb8())
                } else {
                    DynamicImage::ImageLuma8(image.to_luma8())
                };
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut out,
                    quality(80).max(1),
                );
                flat.write_with_encoder(encoder)
                    .map_err(encode_failed(format))?;
            }
            Format::Png if options.palette => return encode_palette_png(image, options),
            Format::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut out,
                    png_compression(options.compression_level),
                    PngFilter::Adaptive,
                );
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_with_encoder(encoder)
                    .map_err(encode_failed(format))?;
            }
            Format::WebP => {
                let mut rgba = image.to_rgba8();
                if !options.lossless {
                    quantize_channels(&mut rgba, Quality::new(quality(75) as u32));
                }
                let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut out);
                DynamicImage::ImageRgba8(rgba)
                    .write_with_encoder(encoder)
                    .map_err(encode_failed(format))?;
            }
            Format::Avif => {
                let q = if options.lossless { 100 } else { quality(65) };
                let encoder =
                    image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut out, AVIF_SPEED, q);
                let pixels = if image.color().has_alpha() {
                    DynamicImage::ImageRgba8(image.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(image.to_rgb8())
                };
                pixels
                    .write_with_encoder(encoder)
                    .map_err(encode_failed(format))?;
            }
            Format::Gif => {
                let mut rgba = image.to_rgba8();
                // The encoder keeps an image that already fits 256 colors
                // exact, so reducing first fixes the palette size.
                if let Some(colors) = options.colors.filter(|&c| c < 256) {
                    reduce_palette(&mut rgba, colors);
                }
                let mut encoder = image::codecs::gif::GifEncoder::new_with_speed(&mut out, GIF_SPEED);
                encoder
                    .encode_frame(image::Frame::new(rgba))
                    .map_err(encode_failed(format))?;
            }
        }

        Ok(out)
    }
}
