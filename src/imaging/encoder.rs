//! Encoder trait and shared error type.
//!
//! Every output format implements [`FormatEncoder`]: it reports its
//! capabilities and turns a decoded image into the bytes of a complete file,
//! metadata included. The production encoders live in
//! [`codecs`](super::codecs); tests substitute a recording mock.

use super::format::FormatInfo;
use super::params::Quality;
use crate::metadata::GenerationMetadata;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("No {0} encoder is compiled in")]
    Unavailable(&'static str),
    #[error("Metadata embedding failed: {0}")]
    Metadata(String),
    #[error("Invalid pixel data: {0}")]
    InvalidInput(String),
}

/// One output format's encoder.
///
/// Implementations must be `Sync`: batches encode on a rayon pool.
pub trait FormatEncoder: Sync {
    fn info(&self) -> FormatInfo;

    /// Encode `image` into a complete file.
    ///
    /// `metadata` is `None` when metadata saving is off. Encoders that cannot
    /// carry metadata ignore it.
    fn encode(
        &self,
        image: &DynamicImage,
        quality: Quality,
        metadata: Option<&GenerationMetadata>,
    ) -> Result<Vec<u8>, EncodeError>;
}
