//! Encoding parameters.
//!
//! - [`Quality`]: encoding quality (1–100), clamped on construction.
//! - [`Quality::for_format`]: the quality an encoder actually uses once the
//!   format's own rules are applied.

use super::format::FormatInfo;

/// Quality setting for image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Formats without a quality knob always use their default; others
    /// take the requested value, clamped.
    pub fn for_format(requested: u32, info: &FormatInfo) -> Self {
        if info.supports_quality {
            Self::new(requested)
        } else {
            Self::new(info.default_quality)
        }
    }

    /// 100 means lossless for formats that offer it.
    pub fn is_lossless(self) -> bool {
        self.0 == 100
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(75)
    }
}
