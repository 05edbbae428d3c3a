//! AVIF header parsing and decode.
//!
//! The `image` crate's `"avif"` feature only provides the encoder (rav1e).
//! Decoding would need `"avif-native"`, which links the C library dav1d, so
//! uploads are decoded with `avif-parse` (container) + `rav1d` (pure Rust
//! port of dav1d) and a BT.601 YUV→RGB conversion.

use super::backend::BackendError;
use image::{DynamicImage, RgbImage};
use std::io::Cursor;

/// True when `data` starts with an ISO-BMFF `ftyp` box branded AVIF.
pub fn sniff(data: &[u8]) -> bool {
    data.len() >= 12 && &data[4..8] == b"ftyp" && matches!(&data[8..12], b"avif" | b"avis")
}

fn parse(data: &[u8]) -> Result<avif_parse::AvifData, BackendError> {
    avif_parse::read_avif(&mut Cursor::new(data))
        .map_err(|e| BackendError::Unreadable(format!("Failed to parse AVIF: {e:?}")))
}

/// Dimensions from the container metadata; no AV1 decode.
pub fn dimensions(data: &[u8]) -> Result<(u32, u32), BackendError> {
    let avif = parse(data)?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| BackendError::Unreadable(format!("Failed to read AVIF metadata: {e:?}")))?;
    Ok((meta.max_frame_width.get(), meta.max_frame_height.get()))
}

fn rav1d_failed(step: &str, code: i32) -> BackendError {
    BackendError::ProcessingFailed(format!("rav1d {step} failed ({code})"))
}

/// Decode the primary AV1 item to RGB8.
pub fn decode(data: &[u8]) -> Result<DynamicImage, BackendError> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use rav1d::src::lib as dav1d;
    use std::ptr::NonNull;

    let avif = parse(data)?;
    let av1: &[u8] = &avif.primary_item;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    let settings_ptr = NonNull::new(settings.as_mut_ptr())
        .ok_or_else(|| BackendError::ProcessingFailed("rav1d settings allocation".into()))?;
    unsafe { dav1d::dav1d_default_settings(settings_ptr) };
    let mut settings = unsafe { settings.assume_init() };
    // One picture per request; the server parallelizes across requests.
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { dav1d::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(rav1d_failed("open", rc.0));
    }

    let mut input = Dav1dData::default();
    let buf = unsafe { dav1d::dav1d_data_create(NonNull::new(&mut input), av1.len()) };
    if buf.is_null() {
        unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(BackendError::ProcessingFailed(
            "rav1d data_create failed".into(),
        ));
    }
    unsafe { std::ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len()) };

    let rc = unsafe { dav1d::dav1d_send_data(ctx, NonNull::new(&mut input)) };
    if rc.0 != 0 {
        unsafe {
            dav1d::dav1d_data_unref(NonNull::new(&mut input));
            dav1d::dav1d_close(NonNull::new(&mut ctx));
        }
        return Err(rav1d_failed("send_data", rc.0));
    }

    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { dav1d::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(rav1d_failed("get_picture", rc.0));
    }

    let layout = pic.p.layout;
    let subsampling = match layout {
        DAV1D_PIXEL_LAYOUT_I400 => Some(None),
        DAV1D_PIXEL_LAYOUT_I420 => Some(Some((true, true))),
        DAV1D_PIXEL_LAYOUT_I422 => Some(Some((true, false))),
        DAV1D_PIXEL_LAYOUT_I444 => Some(Some((false, false))),
        _ => None,
    };

    let (width, height) = (pic.p.w as u32, pic.p.h as u32);
    let rgb = match (subsampling, pic.data[0]) {
        (Some(chroma), Some(luma_plane)) => {
            let y_ptr = luma_plane.as_ptr() as *const u8;
            let chroma_planes = match (chroma, pic.data[1], pic.data[2]) {
                (None, _, _) => Some((y_ptr, y_ptr, (false, false))),
                (Some(ss), Some(u), Some(v)) => {
                    Some((u.as_ptr() as *const u8, v.as_ptr() as *const u8, ss))
                }
                _ => None,
            };
            chroma_planes.map(|(u_ptr, v_ptr, (ss_x, ss_y))| {
                YuvPlanes {
                    y_ptr,
                    u_ptr,
                    v_ptr,
                    y_stride: pic.stride[0],
                    uv_stride: if chroma.is_some() { pic.stride[1] } else { 0 },
                    width,
                    height,
                    bpc: pic.p.bpc as u32,
                    ss_x,
                    ss_y,
                    monochrome: chroma.is_none(),
                }
                .to_rgb()
            })
        }
        _ => None,
    };

    unsafe {
        dav1d::dav1d_picture_unref(NonNull::new(&mut pic));
        dav1d::dav1d_close(NonNull::new(&mut ctx));
    }

    let rgb = rgb.ok_or_else(|| {
        BackendError::ProcessingFailed(format!("Unsupported AVIF pixel layout: {layout}"))
    })?;
    RgbImage::from_raw(width, height, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| BackendError::ProcessingFailed("Decoded AVIF buffer size mismatch".into()))
}

/// Borrowed YUV planes from a rav1d picture.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling: horizontal, vertical (e.g. I420 = true, true)
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    /// Interleaved RGB8 using BT.601 coefficients.
    fn to_rgb(&self) -> Vec<u8> {
        let max_val = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max_val;

        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);
        for row in 0..self.height {
            for col in 0..self.width {
                let y = self.sample(self.y_ptr, self.y_stride, col, row);
                if self.monochrome {
                    let v = (y * scale).clamp(0.0, 255.0) as u8;
                    rgb.extend_from_slice(&[v, v, v]);
                    continue;
                }

                let cx = if self.ss_x { col / 2 } else { col };
                let cy = if self.ss_y { row / 2 } else { row };
                let cb = self.sample(self.u_ptr, self.uv_stride, cx, cy) - center;
                let cr = self.sample(self.v_ptr, self.uv_stride, cx, cy) - center;

                let to_8bit = |v: f32| (v * scale).clamp(0.0, 255.0) as u8;
                rgb.extend_from_slice(&[
                    to_8bit(y + 1.402 * cr),
                    to_8bit(y - 0.344136 * cb - 0.714136 * cr),
                    to_8bit(y + 1.772 * cb),
                ]);
            }
        }
        rgb
    }

    /// One sample from a plane; >8-bit content is stored as u16.
    #[inline]
    fn sample(&self, ptr: *const u8, stride: isize, x: u32, y: u32) -> f32 {
        if self.bpc <= 8 {
            (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
        } else {
            let offset = y as isize * stride + x as isize * 2;
            (unsafe { *(ptr.offset(offset) as *const u16) }) as f32
        }
    }
}
