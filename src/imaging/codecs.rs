//! Production encoders, backed by the `image` crate plus `webp` for lossy WebP.
//!
//! ## Crate mapping
//!
//! | Format | Encoder | Metadata |
//! |---|---|---|
//! | PNG | `PngEncoder` (best compression, adaptive filter) | `tEXt`/`iTXt` via [`png_text`](super::png_text) |
//! | WebP | `webp::Encoder` below quality 100, `WebPEncoder::new_lossless` at 100 | `EXIF` chunk via [`exif`](super::exif) |
//! | JPEG | `JpegEncoder` (alpha flattened onto white) | `APP1` via [`exif`](super::exif) |
//! | AVIF | `AvifEncoder` (rav1e, speed 6) | `Exif` item via [`heif`](super::heif) |
//! | TIFF | `ImageFormat::Tiff` | none |
//! | GIF | `ImageFormat::Gif` (quantized) | none |
//! | BMP | `ImageFormat::Bmp` (alpha flattened onto white) | none |
//! | JPEG XL | not compiled in | |
//!
//! Metadata that cannot be embedded (too large for a JPEG segment, invalid
//! PNG keyword) is skipped with a warning; the image itself is still written.

use super::encoder::{EncodeError, FormatEncoder};
use super::format::{FormatInfo, OutputFormat};
use super::params::Quality;
use super::pixels::flatten_alpha;
use super::{exif, heif, png_text};
use crate::metadata::GenerationMetadata;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::warn;

/// Encoder for `format`.
pub fn encoder_for(format: OutputFormat) -> &'static dyn FormatEncoder {
    match format {
        OutputFormat::Png => &PngCodec,
        OutputFormat::Webp => &WebpCodec,
        OutputFormat::Jpeg => &JpegCodec,
        OutputFormat::Avif => &AvifCodec,
        OutputFormat::Jxl => &JxlCodec,
        OutputFormat::Tiff => &TiffCodec,
        OutputFormat::Gif => &GifCodec,
        OutputFormat::Bmp => &BmpCodec,
    }
}

/// Capabilities of `format`'s encoder.
pub fn format_info(format: OutputFormat) -> FormatInfo {
    encoder_for(format).info()
}

/// 8-bit RGB or RGBA, whichever keeps the image's alpha.
fn to_8bit(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image.clone(),
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn write_with_format(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, EncodeError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

/// Run an embedding step; on failure keep the plain encoding and warn.
fn embed_or_warn(
    format: &str,
    encoded: Vec<u8>,
    embed: impl FnOnce(&[u8]) -> Result<Vec<u8>, EncodeError>,
) -> Vec<u8> {
    match embed(&encoded) {
        Ok(with_metadata) => with_metadata,
        Err(e) => {
            warn!("Skipping {} metadata: {}", format, e);
            encoded
        }
    }
}

fn info(
    extension: &'static str,
    supports_metadata: bool,
    supports_quality: bool,
    supports_lossless: bool,
    default_quality: u32,
) -> FormatInfo {
    FormatInfo {
        extension,
        supports_metadata,
        supports_quality,
        supports_lossless,
        default_quality,
        available: true,
    }
}

pub struct PngCodec;

impl FormatEncoder for PngCodec {
    fn info(&self) -> FormatInfo {
        info(".png", true, false, true, 100)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        _quality: Quality,
        metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive);
        to_8bit(image).write_with_encoder(encoder)?;

        Ok(match metadata {
            Some(meta) => embed_or_warn("PNG", out, |png| {
                png_text::insert_text_chunks(png, &meta.png_text_entries())
            }),
            None => out,
        })
    }
}

/// Lossy through libwebp, lossless at quality 100.
pub struct WebpCodec;

impl FormatEncoder for WebpCodec {
    fn info(&self) -> FormatInfo {
        info(".webp", true, true, true, 75)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        quality: Quality,
        metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        let pixels = to_8bit(image);
        let out = if quality.is_lossless() {
            let mut out = Vec::new();
            pixels.write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
            out
        } else {
            webp::Encoder::from_image(&pixels)
                .map_err(|e| EncodeError::InvalidInput(format!("WebP: {e}")))?
                .encode(quality.value() as f32)
                .to_vec()
        };

        let fields = metadata.map(GenerationMetadata::exif_fields).unwrap_or_default();
        if fields.is_empty() {
            return Ok(out);
        }
        let tiff = exif::tiff_block(&fields);
        let has_alpha = pixels.color().has_alpha();
        Ok(embed_or_warn("WebP", out, |webp| {
            exif::insert_webp_exif(webp, &tiff, pixels.width(), pixels.height(), has_alpha)
        }))
    }
}

pub struct JpegCodec;

impl FormatEncoder for JpegCodec {
    fn info(&self) -> FormatInfo {
        info(".jpg", true, true, false, 91)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        quality: Quality,
        metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        let flat = DynamicImage::ImageRgb8(flatten_alpha(image));
        let mut out = Vec::new();
        flat.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality.value() as u8))?;

        let fields = metadata.map(GenerationMetadata::exif_fields).unwrap_or_default();
        if fields.is_empty() {
            return Ok(out);
        }
        let tiff = exif::tiff_block(&fields);
        Ok(embed_or_warn("JPEG", out, |jpeg| exif::insert_jpeg_exif(jpeg, &tiff)))
    }
}

pub struct AvifCodec;

impl FormatEncoder for AvifCodec {
    fn info(&self) -> FormatInfo {
        info(".avif", true, true, true, 60)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        quality: Quality,
        metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        let encoder = AvifEncoder::new_with_speed_quality(&mut out, 6, quality.value() as u8);
        to_8bit(image).write_with_encoder(encoder)?;

        let fields = metadata.map(GenerationMetadata::exif_fields).unwrap_or_default();
        if fields.is_empty() {
            return Ok(out);
        }
        let tiff = exif::tiff_block(&fields);
        Ok(embed_or_warn("AVIF", out, |avif| heif::insert_avif_exif(avif, &tiff)))
    }
}

pub struct TiffCodec;

impl FormatEncoder for TiffCodec {
    fn info(&self) -> FormatInfo {
        info(".tiff", false, false, true, 91)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        _quality: Quality,
        _metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        write_with_format(&to_8bit(image), ImageFormat::Tiff)
    }
}

pub struct GifCodec;

impl FormatEncoder for GifCodec {
    fn info(&self) -> FormatInfo {
        info(".gif", false, false, true, 100)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        _quality: Quality,
        _metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        write_with_format(&DynamicImage::ImageRgba8(image.to_rgba8()), ImageFormat::Gif)
    }
}

pub struct BmpCodec;

impl FormatEncoder for BmpCodec {
    fn info(&self) -> FormatInfo {
        info(".bmp", false, false, true, 100)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        _quality: Quality,
        _metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        write_with_format(&DynamicImage::ImageRgb8(flatten_alpha(image)), ImageFormat::Bmp)
    }
}

/// Recognised so configuration can name it, but nothing can encode it.
pub struct JxlCodec;

impl FormatEncoder for JxlCodec {
    fn info(&self) -> FormatInfo {
        FormatInfo {
            available: false,
            ..info(".jxl", false, true, true, 90)
        }
    }

    fn encode(
        &self,
        _image: &DynamicImage,
        _quality: Quality,
        _metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError> {
        Err(EncodeError::Unavailable(OutputFormat::Jxl.name()))
    }
}
