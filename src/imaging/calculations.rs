//! Pure calculation functions for geometry and color.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{Fit, Modulation, Position, ResizeParams, Rgba};

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Target area dimensions (width, height)
///
/// # Returns
/// * `(width, height)` - Fill dimensions (at least one matches target)
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w.max(1), h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h.max(1))
    }
}

/// Calculate the largest dimensions that fit inside a target area.
///
/// The counterpart of [`calculate_fill_dimensions`]: one dimension matches,
/// the other is smaller or equal.
pub fn calculate_fit_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h.max(1))
    } else {
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w.max(1), h)
    }
}

/// Offset of a `len`-sized span inside `outer`, anchored at `fraction`.
fn anchor_offset(outer: u32, len: u32, fraction: f32) -> u32 {
    let free = outer.saturating_sub(len);
    (free as f32 * fraction.clamp(0.0, 1.0)).round() as u32
}

/// What a resize turns into once the fit mode is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
    /// Scale straight to these dimensions.
    Scale { width: u32, height: u32 },
    /// Scale to `scaled`, then cut a `width`×`height` window at (`x`, `y`).
    Crop {
        scaled: (u32, u32),
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Scale to `scaled`, then place it at (`x`, `y`) on a
    /// `width`×`height` background canvas.
    Pad {
        scaled: (u32, u32),
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Resolve a resize request against the current image dimensions.
pub fn plan_resize(source: (u32, u32), params: &ResizeParams) -> ResizePlan {
    let target = (params.width, params.height);
    let Position { x, y } = params.position;

    match params.fit {
        Fit::Fill => ResizePlan::Scale {
            width: target.0,
            height: target.1,
        },
        Fit::Inside => {
            let (width, height) = calculate_fit_dimensions(source, target);
            ResizePlan::Scale { width, height }
        }
        Fit::Outside => {
            let (width, height) = calculate_fill_dimensions(source, target);
            ResizePlan::Scale { width, height }
        }
        Fit::Cover => {
            let scaled = calculate_fill_dimensions(source, target);
            ResizePlan::Crop {
                scaled,
                x: anchor_offset(scaled.0, target.0, x),
                y: anchor_offset(scaled.1, target.1, y),
                width: target.0,
                height: target.1,
            }
        }
        Fit::Contain => {
            let scaled = calculate_fit_dimensions(source, target);
            ResizePlan::Pad {
                scaled,
                x: anchor_offset(target.0, scaled.0, x),
                y: anchor_offset(target.1, scaled.1, y),
                width: target.0,
                height: target.1,
            }
        }
    }
}

/// Bounding box of a `width`×`height` image rotated by `degrees`.
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let radians = degrees.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let w = width as f64 * cos + height as f64 * sin;
    let h = width as f64 * sin + height as f64 * cos;
    // Shave float noise so 90° multiples stay exact.
    let snap = |v: f64| (v - 1e-6).ceil().max(1.0) as u32;
    (snap(w), snap(h))
}

/// Window size for the median filter: at least 1, always odd.
pub fn odd_window(size: u32) -> u32 {
    let size = size.max(1);
    if size % 2 == 0 { size + 1 } else { size }
}

/// Rec. 601 luma of an RGB triple, 0–255.
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// RGB (0–255) → HSL (hue degrees, saturation 0–1, lightness 0–1).
pub fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let delta = max - min;

    if delta == 0.0 {
        return (0.0, 0.0, l);
    }

    let s = delta / (1.0 - (2.0 * l - 1.0).abs());
    let h = if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    (h, s.clamp(0.0, 1.0), l)
}

/// HSL → RGB (0–255). Hue wraps modulo 360.
pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (u8, u8, u8) {
    let h = h.rem_euclid(360.0);
    let s = s.clamp(0.0, 1.0);
    let l = l.clamp(0.0, 1.0);

    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = l - c / 2.0;
    let (r, g, b) = match h as u32 / 60 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (
        to_u8((r + m) * 255.0),
        to_u8((g + m) * 255.0),
        to_u8((b + m) * 255.0),
    )
}

/// Apply brightness, saturation and hue together to one pixel.
pub fn modulate_pixel(rgb: [u8; 3], m: &Modulation) -> [u8; 3] {
    let (h, s, l) = rgb_to_hsl(rgb[0], rgb[1], rgb[2]);
    let (r, g, b) = hsl_to_rgb(h + m.hue as f32, s * m.saturation, l * m.brightness);
    [r, g, b]
}

/// Classic sepia tone matrix.
pub fn sepia_pixel(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    [
        to_u8(0.393 * r + 0.769 * g + 0.189 * b),
        to_u8(0.349 * r + 0.686 * g + 0.168 * b),
        to_u8(0.272 * r + 0.534 * g + 0.131 * b),
    ]
}

/// Recolor a pixel with `tint` while keeping its luminance.
pub fn tint_pixel(rgb: [u8; 3], tint: Rgba) -> [u8; 3] {
    let [tr, tg, tb, _] = tint.0;
    let tint_luma = luma(tr, tg, tb).max(1.0);
    let scale = luma(rgb[0], rgb[1], rgb[2]) / tint_luma;
    [
        to_u8(tr as f32 * scale),
        to_u8(tg as f32 * scale),
        to_u8(tb as f32 * scale),
    ]
}

/// Linear stretch mapping `[low, high]` onto `[0, 255]`.
pub fn stretch(value: u8, low: u8, high: u8) -> u8 {
    if high <= low {
        return value;
    }
    to_u8((value as f32 - low as f32) * 255.0 / (high - low) as f32)
}
