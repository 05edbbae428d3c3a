//! Format policy table: fixed encode parameters per output format.
//!
//! Every handler ends in the same encode step, so quality/size trade-offs are
//! decided here once and never per operation. The table is a set of constants;
//! nothing writes to it at request time.
//!
//! | format | quality | lossless | compression | palette |
//! |---|---|---|---|---|
//! | jpeg | 80 | – | – | – |
//! | png | – | – | 9 | yes |
//! | webp | 75 | no | – | – |
//! | avif | 65 | no | – | – |
//! | gif | – | – | – | 256 colors |

use crate::format::Format;
use crate::imaging::Quality;

/// Encode parameters for one output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Lossy quality (0–100). `None` for formats without a quality knob.
    pub quality: Option<Quality>,
    pub lossless: bool,
    /// zlib compression level (0–9).
    pub compression_level: Option<u8>,
    /// Quantize to an indexed palette before encoding.
    pub palette: bool,
    /// Maximum palette size.
    pub colors: Option<u16>,
}

impl EncodeOptions {
    pub const fn none() -> Self {
        Self {
            quality: None,
            lossless: false,
            compression_level: None,
            palette: false,
            colors: None,
        }
    }
}

const JPEG: EncodeOptions = EncodeOptions {
    quality: Some(Quality::new(80)),
    ..EncodeOptions::none()
};

const PNG: EncodeOptions = EncodeOptions {
    compression_level: Some(9),
    palette: true,
    ..EncodeOptions::none()
};

const WEBP: EncodeOptions = EncodeOptions {
    quality: Some(Quality::new(75)),
    lossless: false,
    ..EncodeOptions::none()
};

const AVIF: EncodeOptions = EncodeOptions {
    quality: Some(Quality::new(65)),
    lossless: false,
    ..EncodeOptions::none()
};

const GIF: EncodeOptions = EncodeOptions {
    colors: Some(256),
    ..EncodeOptions::none()
};

/// Encode policy for `format`. Total over the closed format set.
pub fn policy_for(format: Format) -> &'static EncodeOptions {
    match format {
        Format::Jpeg => &JPEG,
        Format::Png => &PNG,
        Format::WebP => &WEBP,
        Format::Avif => &AVIF,
        Format::Gif => &GIF,
    }
}
