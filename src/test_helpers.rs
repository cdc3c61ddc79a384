//! Shared test utilities.
//!
//! Provides a small workflow graph, a fixed batch timestamp, synthetic images
//! and tiny encoded files for the byte-level writers.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let graph = sample_workflow();
//! let wf = WorkflowRef::new(&graph);
//! let name = TemplateResolver::default()
//!     .resolve("sampler_name, steps", "", "-", NameKind::File, &wf, &fixed_timestamp());
//! assert_eq!(name, "euler-20");
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::{Map, Value, json};
use std::io::Cursor;

use crate::metadata::GenerationMetadata;

// =========================================================================
// Workflow fixtures
// =========================================================================

/// Three-node graph: a sampler, a checkpoint loader and a text encoder.
///
/// - `sampler_name` = `euler`, `steps` = 20, `cfg` = 7.5
/// - `seed` = 12345 lives on node `5`, not on the sampler
/// - `ckpt_name` = `sd_xl_base.safetensors`
pub fn sample_workflow() -> Value {
    json!({
        "1": {
            "class_type": "KSampler",
            "inputs": {
                "sampler_name": "euler",
                "scheduler": "normal",
                "steps": 20,
                "cfg": 7.5,
                "denoise": 1.0
            }
        },
        "5": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": {
                "seed": 12345,
                "ckpt_name": "sd_xl_base.safetensors"
            }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": {
                "text": "a cat in a hat",
                "clip": ["5", 1]
            }
        }
    })
}

/// 2024-01-01 12:00:00.
pub fn fixed_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

/// Metadata for [`sample_workflow`] with a small editor graph as extra info.
pub fn sample_metadata() -> GenerationMetadata {
    let graph = sample_workflow();
    let mut extra = Map::new();
    extra.insert("workflow".into(), json!({ "nodes": [{ "id": 1 }] }));
    GenerationMetadata::prepare(Some(&graph), Some(&extra), "a cat", "", &fixed_timestamp())
}

// =========================================================================
// Synthetic images
// =========================================================================

pub fn gradient_rgb(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 40 % 256) as u8, (y * 40 % 256) as u8, 128])
    }))
}

pub fn gradient_rgba(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 40 % 256) as u8, (y * 40 % 256) as u8, 128, 200])
    }))
}

fn encoded(format: image::ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient_rgb(4, 4).write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// A 4x4 PNG straight from the `image` encoder.
pub fn tiny_png() -> Vec<u8> {
    encoded(image::ImageFormat::Png)
}

/// A 4x4 baseline JPEG with a JFIF `APP0` segment.
pub fn tiny_jpeg() -> Vec<u8> {
    encoded(image::ImageFormat::Jpeg)
}

/// A 4x4 lossless WebP in the simple (`VP8L`) layout.
pub fn tiny_webp() -> Vec<u8> {
    encoded(image::ImageFormat::WebP)
}
