//! Output formats and what each one can do.

use serde::Serialize;
use std::fmt;

/// Every output extension accepted in configuration, in display order.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".avif", ".webp", ".png", ".jpg", ".jpeg", ".jxl", ".gif", ".tiff", ".bmp",
];

/// Image format a batch is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Png,
    Webp,
    Jpeg,
    Avif,
    Jxl,
    Tiff,
    Gif,
    Bmp,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 8] = [
        OutputFormat::Avif,
        OutputFormat::Webp,
        OutputFormat::Png,
        OutputFormat::Jpeg,
        OutputFormat::Jxl,
        OutputFormat::Gif,
        OutputFormat::Tiff,
        OutputFormat::Bmp,
    ];

    /// Parse a configured extension such as `.webp` or `JPG`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::Webp),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "avif" => Some(OutputFormat::Avif),
            "jxl" => Some(OutputFormat::Jxl),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            "gif" => Some(OutputFormat::Gif),
            "bmp" => Some(OutputFormat::Bmp),
            _ => None,
        }
    }

    /// Canonical extension including the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => ".png",
            OutputFormat::Webp => ".webp",
            OutputFormat::Jpeg => ".jpg",
            OutputFormat::Avif => ".avif",
            OutputFormat::Jxl => ".jxl",
            OutputFormat::Tiff => ".tiff",
            OutputFormat::Gif => ".gif",
            OutputFormat::Bmp => ".bmp",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Png => "PNG",
            OutputFormat::Webp => "WebP",
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::Avif => "AVIF",
            OutputFormat::Jxl => "JPEG XL",
            OutputFormat::Tiff => "TIFF",
            OutputFormat::Gif => "GIF",
            OutputFormat::Bmp => "BMP",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capabilities of one format's encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatInfo {
    pub extension: &'static str,
    pub supports_metadata: bool,
    pub supports_quality: bool,
    pub supports_lossless: bool,
    pub default_quality: u32,
    /// Whether an encoder for this format is compiled in.
    pub available: bool,
}
