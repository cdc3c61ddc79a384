//! Encoding images into files.
//!
//! | Concern | Crate / function |
//! |---|---|
//! | **Encode** PNG, WebP, JPEG, AVIF, TIFF, GIF, BMP | `image` crate encoders, `webp` for lossy WebP |
//! | **PNG text** | custom chunk writer (`tEXt` / `iTXt`, CRC via `crc32fast`) |
//! | **EXIF** | custom TIFF IFD writer, inserted as JPEG `APP1`, WebP `EXIF` chunk or AVIF `Exif` item |
//! | **Host tensors** | `f32` BHWC → `DynamicImage` |
//!
//! The module is split into:
//! - **Format**: [`OutputFormat`] and [`FormatInfo`] capabilities
//! - **Parameters**: [`Quality`] and per-format quality rules
//! - **Encoder**: [`FormatEncoder`] trait + [`EncodeError`]
//! - **Codecs**: one encoder per format, selected by [`encoder_for`]
//! - **Pixels**: tensor conversion and alpha flattening
//! - **Byte writers**: `png_text`, `exif` and `heif`

pub mod codecs;
pub mod encoder;
pub mod exif;
mod format;
pub mod heif;
mod params;
pub mod pixels;
pub mod png_text;

pub use codecs::{encoder_for, format_info};
pub use encoder::{EncodeError, FormatEncoder};
pub use format::{FormatInfo, OutputFormat, SUPPORTED_EXTENSIONS};
pub use params::Quality;
pub use pixels::{TensorShape, images_from_batch};
