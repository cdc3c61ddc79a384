//! Pixel preparation before encoding.
//!
//! Hosts hand over image batches as `f32` tensors in BHWC layout with values
//! in `[0, 1]`. Values are scaled to 0–255, clipped and truncated to `u8`.

use super::encoder::EncodeError;
use image::{DynamicImage, GrayImage, Rgb, RgbImage, RgbaImage};

/// Shape of a host image batch: `[batch, height, width, channels]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    /// Values in one image; `None` when the product overflows `usize`.
    pub fn image_len(&self) -> Option<usize> {
        hwc_len(self.width, self.height, self.channels)
    }
}

fn hwc_len(width: usize, height: usize, channels: usize) -> Option<usize> {
    height.checked_mul(width)?.checked_mul(channels)
}

fn too_large(what: impl std::fmt::Debug) -> EncodeError {
    EncodeError::InvalidInput(format!("{what:?} is too large to address"))
}

fn to_u8(v: f32) -> u8 {
    (v * 255.0).clamp(0.0, 255.0) as u8
}

/// Convert one HWC image (1, 3 or 4 channels) into a [`DynamicImage`].
pub fn image_from_hwc(
    data: &[f32],
    width: usize,
    height: usize,
    channels: usize,
) -> Result<DynamicImage, EncodeError> {
    let len = hwc_len(width, height, channels).ok_or_else(|| too_large((width, height, channels)))?;
    if data.len() != len {
        return Err(EncodeError::InvalidInput(format!(
            "{} values do not fill a {width}x{height}x{channels} image",
            data.len()
        )));
    }
    let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(too_large((width, height)));
    };
    let bytes: Vec<u8> = data.iter().copied().map(to_u8).collect();
    let image = match channels {
        1 => GrayImage::from_raw(w, h, bytes).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(w, h, bytes).map(DynamicImage::ImageRgba8),
        n => {
            return Err(EncodeError::InvalidInput(format!(
                "unsupported channel count {n}"
            )));
        }
    };
    image.ok_or_else(|| EncodeError::InvalidInput("pixel buffer size mismatch".into()))
}

/// Split a BHWC batch into images.
pub fn images_from_batch(data: &[f32], shape: TensorShape) -> Result<Vec<DynamicImage>, EncodeError> {
    let per_image = shape.image_len().ok_or_else(|| too_large(shape))?;
    let total = per_image.checked_mul(shape.batch).ok_or_else(|| too_large(shape))?;
    if data.len() != total {
        return Err(EncodeError::InvalidInput(format!(
            "{} values do not match batch shape {:?}",
            data.len(),
            shape
        )));
    }
    if per_image == 0 {
        return Ok(Vec::new());
    }
    data.chunks_exact(per_image)
        .map(|chunk| image_from_hwc(chunk, shape.width, shape.height, shape.channels))
        .collect()
}

/// Composite onto a white background, for formats without alpha.
pub fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let a = p[3] as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}
