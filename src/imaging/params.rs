//! Parameter types for codec operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the operation handlers (which decide which transforms a
//! request needs) and the [`backend`](super::backend) (which does the actual
//! pixel work). A [`Pipeline`](super::Pipeline) stores them as descriptors and
//! replays them against a backend at encode time.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (0–100). Clamped on construction.
//! - [`Rgba`]: An 8-bit color, parsed from `#rgb`, `#rrggbb` or `#rrggbbaa`.
//! - [`Fit`] / [`Position`]: Resize strategy and crop/pad anchor.
//! - [`ResizeParams`], [`RotateParams`], [`Modulation`]: Per-operation inputs.
//! - [`Transform`]: One queued operation.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub const fn new(value: u32) -> Self {
        Self(if value > 100 { 100 } else { value })
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Quality as the `u8` the encoders take.
    pub fn as_u8(self) -> u8 {
        self.0.min(100) as u8
    }
}

/// Largest Gaussian sigma accepted for blur and sharpen.
pub const MAX_SIGMA: f32 = 1000.0;

/// Largest median window accepted, in pixels per side.
pub const MAX_MEDIAN_WINDOW: u32 = 1000;

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const WHITE: Rgba = Rgba([255, 255, 255, 255]);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }
}

impl FromStr for Rgba {
    type Err = String;

    /// Parse a hex color. The leading `#` is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || format!("Invalid color: {s}");
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channels: Option<Vec<u8>> = match hex.len() {
            // #rgb expands each nibble: f -> ff
            3 => hex
                .chars()
                .map(|c| c.to_digit(16).map(|v| (v * 17) as u8))
                .collect(),
            6 | 8 => (0..hex.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
                .collect(),
            _ => None,
        };
        let channels = channels.ok_or_else(invalid)?;
        let alpha = channels.get(3).copied().unwrap_or(255);
        Ok(Rgba([channels[0], channels[1], channels[2], alpha]))
    }
}

/// How the source aspect ratio maps onto the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fit {
    /// Stretch to exactly the target size, ignoring aspect ratio.
    #[default]
    Fill,
    /// Preserve aspect ratio, cover the box, crop the overflow.
    Cover,
    /// Preserve aspect ratio, fit inside the box, pad the rest.
    Contain,
    /// Preserve aspect ratio, fit inside the box, no padding.
    Inside,
    /// Preserve aspect ratio, cover the box, no cropping.
    Outside,
}

impl FromStr for Fit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fill" => Ok(Fit::Fill),
            "cover" => Ok(Fit::Cover),
            "contain" => Ok(Fit::Contain),
            "inside" => Ok(Fit::Inside),
            "outside" => Ok(Fit::Outside),
            other => Err(format!(
                "Invalid fit '{other}'. Expected fill, cover, contain, inside or outside"
            )),
        }
    }
}

/// Horizontal/vertical anchor used when cropping (cover) or padding (contain).
///
/// Each axis is a fraction of the free space: 0.0 = start, 0.5 = center,
/// 1.0 = end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const CENTER: Position = Position { x: 0.5, y: 0.5 };
}

impl Default for Position {
    fn default() -> Self {
        Self::CENTER
    }
}

impl FromStr for Position {
    type Err = String;

    /// Accepts `center`, edge names (`top`, `right top`, `left-bottom`, ...)
    /// and compass names (`north`, `southeast`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let compass = match normalized.as_str() {
            "north" => Some("top"),
            "northeast" => Some("right top"),
            "east" => Some("right"),
            "southeast" => Some("right bottom"),
            "south" => Some("bottom"),
            "southwest" => Some("left bottom"),
            "west" => Some("left"),
            "northwest" => Some("left top"),
            _ => None,
        };
        let words = compass.unwrap_or(&normalized);

        let mut position = Position::CENTER;
        for word in words.split([' ', '-', '_']).filter(|w| !w.is_empty()) {
            match word {
                "center" | "centre" => {}
                "top" => position.y = 0.0,
                "bottom" => position.y = 1.0,
                "left" => position.x = 0.0,
                "right" => position.x = 1.0,
                _ => return Err(format!("Invalid position '{s}'")),
            }
        }
        Ok(position)
    }
}

/// Parameters for a resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
    pub position: Position,
    /// Fill for padding introduced by [`Fit::Contain`].
    pub background: Rgba,
}

/// Parameters for a rotation. Positive angles turn clockwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotateParams {
    pub angle: i64,
    pub background: Rgba,
}

/// Combined brightness/saturation/hue adjustment, applied in one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulation {
    /// Multiplier on lightness.
    pub brightness: f32,
    /// Multiplier on saturation.
    pub saturation: f32,
    /// Hue rotation in degrees.
    pub hue: i32,
}

impl Default for Modulation {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            saturation: 1.0,
            hue: 0,
        }
    }
}

/// Fixed tint color for the `tint` effect.
pub const TINT_COLOR: Rgba = Rgba([255, 240, 16, 255]);

/// One queued pixel operation.
#[derive(Clone, PartialEq)]
pub enum Transform {
    Resize(ResizeParams),
    Rotate(RotateParams),
    Blur { sigma: f32 },
    Sharpen { sigma: f32 },
    Modulate(Modulation),
    Grayscale,
    Sepia,
    Negate,
    Tint(Rgba),
    Normalize,
    Median { size: u32 },
    /// Alpha-blend the encoded `overlay` centered over the image.
    Composite { overlay: Bytes },
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Resize(p) => f.debug_tuple("Resize").field(p).finish(),
            Transform::Rotate(p) => f.debug_tuple("Rotate").field(p).finish(),
            Transform::Blur { sigma } => write!(f, "Blur({sigma})"),
            Transform::Sharpen { sigma } => write!(f, "Sharpen({sigma})"),
            Transform::Modulate(m) => f.debug_tuple("Modulate").field(m).finish(),
            Transform::Grayscale => f.write_str("Grayscale"),
            Transform::Sepia => f.write_str("Sepia"),
            Transform::Negate => f.write_str("Negate"),
            Transform::Tint(c) => f.debug_tuple("Tint").field(c).finish(),
            Transform::Normalize => f.write_str("Normalize"),
            Transform::Median { size } => write!(f, "Median({size})"),
            // Overlay bytes are not worth printing.
            Transform::Composite { overlay } => write!(f, "Composite({} bytes)", overlay.len()),
        }
    }
}
