//! # Save Image Extended
//!
//! Saves images produced by a node-based image generation workflow under
//! templated names, with the workflow embedded in the files.
//!
//! A name is built from a comma-separated key list such as
//! `sampler_name, cfg, steps, %F %H-%M-%S`: workflow parameters, node inputs
//! and timestamp formats, joined with a delimiter and followed by a counter.
//! Folders are built the same way and may nest with `./name` keys.
//!
//! # Pipeline
//!
//! ```text
//! templates + workflow  →  base name, folder      (template)
//! folder                →  output/<folder>/       (paths)
//! existing files        →  first free counter     (counter, naming)
//! workflow + prompts    →  metadata dictionary    (metadata)
//! image + metadata      →  encoded file bytes     (imaging)
//! saved image           →  job data sidecar       (jobdata)
//! ```
//!
//! [`save::ImageSaver`] runs this for a whole batch at once.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`workflow`] | Lookups in the host's workflow graph, parameter extraction, fingerprint |
//! | [`template`] | Key-list parsing, resolution and name cleaning |
//! | [`naming`] | Counter placement in file names, counter regex |
//! | [`counter`] | Highest existing counter per folder, block reservation |
//! | [`paths`] | Folder sanitizing below the output root, root info and cleanup |
//! | [`imaging`] | Output formats, encoders, PNG text chunks, EXIF |
//! | [`metadata`] | The metadata dictionary and its per-format views |
//! | [`jobdata`] | JSON sidecars at a configurable detail level, old-sidecar cleanup |
//! | [`cache`] | Bounded TTL memo cache with hit/miss stats |
//! | [`save`] | Batch orchestration, worker pool, progress events, timings |
//! | [`config`] | `save-image.toml` loading, presets, validation |
//! | [`output`] | CLI output formatting |
//! | [`types`] | Results handed back to the host |
//!
//! # Design Decisions
//!
//! ## One Timestamp per Batch
//!
//! Every file of a batch resolves its time keys against the same instant, so
//! a batch never straddles two date folders.
//!
//! ## Counters Are Reserved, Not Guessed
//!
//! The folder is scanned once; afterwards counters come from memory. A batch
//! takes its whole block under one lock, so two batches writing to the same
//! folder at once cannot hand out the same number.
//!
//! ## Encoding
//!
//! Encoders come from the `image` crate (AVIF through `rav1e`), except lossy
//! WebP, which goes through libwebp via the `webp` crate. Metadata is written
//! by small byte-level writers in [`imaging::png_text`], [`imaging::exif`] and
//! [`imaging::heif`]. JPEG XL is recognised in configuration but has no
//! encoder, so selecting it is a validation error.

pub mod cache;
pub mod config;
pub mod counter;
pub mod imaging;
pub mod jobdata;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod paths;
pub mod save;
pub mod template;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_helpers;
