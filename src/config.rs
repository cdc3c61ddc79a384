//! Save configuration.
//!
//! Handles loading, validating and merging `save-image.toml`. Settings are
//! layered: stock defaults, then the user's config file, then an optional
//! preset, then per-field command line overrides.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! filename_prefix = "ComfyUI"
//! filename_keys = "sampler_name, cfg, steps, %F %H-%M-%S"
//! foldername_prefix = ""
//! foldername_keys = "ckpt_name"
//! delimiter = "-"
//! output_format = ".webp"
//! quality = 75
//! save_metadata = true
//! counter_digits = 4
//! counter_position = "last"        # "first" or "last"
//! one_counter_per_folder = true
//! save_job_data = "disabled"       # disabled | basic | models | sampler | prompt
//! job_data_per_image = false
//! job_custom_text = ""
//! image_preview = true
//!
//! [processing]
//! max_workers = 4                  # Clamped to the number of CPU cores
//!
//! [cache]
//! max_entries = 1000
//! ttl_secs = 3600
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse, override just the values you want:
//!
//! ```toml
//! output_format = ".png"
//! foldername_keys = "%Y-%m-%d, ./ckpt_name"
//! ```
//!
//! Unknown keys are rejected to catch typos early.
//!
//! ## Validation
//!
//! [`SaveConfig::validate_report`] collects every problem instead of stopping
//! at the first. Errors make [`SaveConfig::validate`] fail; warnings are only
//! shown by the `check` command.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::imaging::{OutputFormat, format_info};
use crate::jobdata::{JobDataLevel, JobDataOptions};
use crate::naming::{CounterPosition, NameScheme};
use crate::template::{self, TemplateKey};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings for saving a batch of images.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveConfig {
    /// Text placed before the resolved filename keys.
    pub filename_prefix: String,
    /// Comma-separated key list for the file name.
    pub filename_keys: String,
    /// Text placed before the resolved folder keys.
    pub foldername_prefix: String,
    /// Comma-separated key list for the folder, relative to the output root.
    pub foldername_keys: String,
    pub delimiter: String,
    /// Extension including the dot, e.g. `.webp`.
    pub output_format: String,
    /// 1-100. Ignored by formats without a quality setting.
    pub quality: u32,
    pub save_metadata: bool,
    pub counter_digits: u32,
    pub counter_position: CounterPosition,
    /// Count every file in the folder, not only those with the same base name.
    pub one_counter_per_folder: bool,
    pub save_job_data: JobDataLevel,
    pub job_data_per_image: bool,
    pub job_custom_text: String,
    /// Report saved files back to the host for display.
    pub image_preview: bool,
    pub processing: ProcessingConfig,
    pub cache: CacheConfig,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            filename_prefix: "ComfyUI".into(),
            filename_keys: "sampler_name, cfg, steps, %F %H-%M-%S".into(),
            foldername_prefix: String::new(),
            foldername_keys: "ckpt_name".into(),
            delimiter: "-".into(),
            output_format: ".webp".into(),
            quality: 75,
            save_metadata: true,
            counter_digits: 4,
            counter_position: CounterPosition::Last,
            one_counter_per_folder: true,
            save_job_data: JobDataLevel::Disabled,
            job_data_per_image: false,
            job_custom_text: String::new(),
            image_preview: true,
            processing: ProcessingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel encode workers.
    /// Values larger than the core count are clamped down.
    pub max_workers: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

/// Memo cache limits for template parsing and parameter lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
            ttl_secs: crate::cache::DEFAULT_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Resolve the effective worker count.
///
/// `0` means all cores; anything else is `min(n, cores)`.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match config.max_workers {
        0 => cores,
        n => n.min(cores),
    }
}

// =============================================================================
// Derived settings
// =============================================================================

impl SaveConfig {
    /// Configured extension, lowercased, with a leading dot.
    pub fn extension(&self) -> String {
        let ext = self.output_format.trim().to_ascii_lowercase();
        if ext.starts_with('.') {
            ext
        } else {
            format!(".{ext}")
        }
    }

    pub fn format(&self) -> Option<OutputFormat> {
        OutputFormat::from_extension(&self.output_format)
    }

    pub fn name_scheme(&self) -> NameScheme {
        NameScheme {
            delimiter: self.delimiter.clone(),
            counter_digits: self.counter_digits as usize,
            position: self.counter_position,
            extension: self.extension(),
        }
    }

    pub fn job_data_options(&self) -> JobDataOptions {
        JobDataOptions {
            level: self.save_job_data,
            per_image: self.job_data_per_image,
            custom_text: self.job_custom_text.clone(),
            filename_prefix: self.filename_prefix.clone(),
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Problems found in a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// `./name` or `../name` with a single word-like segment.
fn is_simple_path_key(raw: &str) -> bool {
    let Some(rest) = raw.strip_prefix("./").or_else(|| raw.strip_prefix("../")) else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

impl SaveConfig {
    /// Check every field and collect errors and warnings.
    pub fn validate_report(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let now = Local::now().naive_local();
        validate_keys(&self.filename_keys, "filename_keys", &now, &mut report);
        validate_keys(&self.foldername_keys, "foldername_keys", &now, &mut report);

        match self.format() {
            None => report.error(format!("unsupported output format: {}", self.output_format)),
            Some(format) if !format_info(format).available => report.error(format!(
                "{} output is not available in this build",
                format.name()
            )),
            Some(_) => {}
        }
        if !(1..=100).contains(&self.quality) {
            report.error("quality must be between 1 and 100");
        }
        if !(1..=8).contains(&self.counter_digits) {
            report.error("counter_digits must be between 1 and 8");
        }
        if self.delimiter.is_empty() || self.delimiter.chars().count() > 3 {
            report.warning("a short delimiter such as - or _ is recommended");
        }
        report
    }

    /// Fail with every error of the report, joined.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let report = self.validate_report();
        if report.is_valid() {
            Ok(())
        } else {
            Err(ConfigError::Validation(report.errors.join("; ")))
        }
    }
}

fn validate_keys(list: &str, field: &str, now: &NaiveDateTime, report: &mut ValidationReport) {
    for raw in template::split_keys(list) {
        match TemplateKey::parse(&raw) {
            TemplateKey::Timestamp(pattern) => {
                if template::format_timestamp(&pattern, now).is_none() {
                    report.error(format!("{field}: invalid time format: {raw}"));
                }
            }
            TemplateKey::PathSegment(_) => {
                if field == "foldername_keys" && !is_simple_path_key(&raw) {
                    report.warning(format!("{field}: path segment may not work as expected: {raw}"));
                }
            }
            TemplateKey::Malformed(_) => report.error(format!(
                "{field}: malformed node reference: {raw} (expected node_id.input_name)"
            )),
            TemplateKey::NodeInput { .. } | TemplateKey::Parameter(_) => {}
        }
    }
}

// =============================================================================
// Presets and help
// =============================================================================

/// A named bundle of naming settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub filename_keys: &'static str,
    pub foldername_keys: &'static str,
    pub delimiter: &'static str,
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "simple",
        description: "Sampler and step count",
        filename_keys: "sampler_name, steps",
        foldername_keys: "ckpt_name",
        delimiter: "-",
    },
    Preset {
        name: "detailed",
        description: "Timestamped names with a per-sampler subfolder",
        filename_keys: "sampler_name, cfg, steps, %Y-%m-%d_%H-%M-%S",
        foldername_keys: "ckpt_name, ./sampler_name",
        delimiter: "_",
    },
    Preset {
        name: "organized",
        description: "Grouped by date, then by model",
        filename_keys: "ckpt_name, sampler_name, cfg, steps",
        foldername_keys: "%Y-%m-%d, ./ckpt_name",
        delimiter: "-",
    },
    Preset {
        name: "minimal",
        description: "Timestamp only",
        filename_keys: "%Y%m%d_%H%M%S",
        foldername_keys: "",
        delimiter: "",
    },
];

pub fn preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name == name)
}

impl SaveConfig {
    /// Overwrite the naming fields with a preset's values.
    pub fn apply_preset(&mut self, name: &str) -> Result<(), ConfigError> {
        let preset = preset(name).ok_or_else(|| {
            let known: Vec<&str> = PRESETS.iter().map(|p| p.name).collect();
            ConfigError::Validation(format!(
                "unknown preset {name:?} (expected one of: {})",
                known.join(", ")
            ))
        })?;
        self.filename_keys = preset.filename_keys.into();
        self.foldername_keys = preset.foldername_keys.into();
        self.delimiter = preset.delimiter.into();
        Ok(())
    }
}

/// Help text for a configuration field, if there is any.
pub fn field_help(field: &str) -> Option<&'static str> {
    let text = match field {
        "filename_keys" => {
            "Filename keys:\n\
             - sampler_name: sampler name (e.g. euler_a)\n\
             - cfg: CFG scale (e.g. 7.5)\n\
             - steps: sampling steps (e.g. 20)\n\
             - ckpt_name: model name (e.g. sd_xl_base)\n\
             - seed: random seed\n\
             - %Y-%m-%d: date (e.g. 2024-01-15)\n\
             - %H-%M-%S: time (e.g. 14-30-25)\n\
             - node_id.input: a specific node's input (e.g. 5.seed)"
        }
        "foldername_keys" => {
            "Folder keys:\n\
             - ckpt_name: model name\n\
             - sampler_name: sampler name\n\
             - ./name: nested subfolder\n\
             - ../name: nested subfolder, same as ./name\n\
             - %Y-%m-%d: group by date\n\
             - node_id.input: a specific node's input"
        }
        "delimiter" => "Separator between name parts. Prefer - or _ to avoid special characters.",
        "quality" => "Image quality 1-100 for JPEG, WebP and AVIF; 100 is lossless for WebP and AVIF.",
        "counter_position" => "Counter position: last = end of the name, first = start of the name.",
        "save_job_data" => "Job data sidecar: disabled, basic, models, sampler or prompt.",
        _ => return None,
    };
    Some(text)
}

/// Sample values used by [`SaveConfig::preview_filename`].
pub fn default_preview_sample() -> Map<String, Value> {
    let mut sample = Map::new();
    for (key, value) in [
        ("sampler_name", "euler_a"),
        ("cfg", "7.5"),
        ("steps", "20"),
        ("ckpt_name", "sd_xl_base"),
        ("seed", "12345"),
    ] {
        sample.insert(key.into(), Value::String(value.into()));
    }
    sample
}

impl SaveConfig {
    /// Show roughly what a file name will look like, without a workflow.
    ///
    /// Parameters come from `sample`; node references and unknown keys are
    /// shown as bracketed placeholders. The counter is always 1.
    pub fn preview_filename(&self, sample: &Map<String, Value>, timestamp: &NaiveDateTime) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.filename_prefix.is_empty() {
            parts.push(self.filename_prefix.clone());
        }
        for raw in template::split_keys(&self.filename_keys) {
            let part = match TemplateKey::parse(&raw) {
                TemplateKey::Timestamp(pattern) => template::format_timestamp(&pattern, timestamp)
                    .unwrap_or_else(|| format!("[bad time format:{raw}]")),
                TemplateKey::Parameter(name) => match sample.get(&name) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => format!("[unknown:{raw}]"),
                },
                TemplateKey::NodeInput { .. } => format!("[node:{raw}]"),
                TemplateKey::PathSegment(segment) => segment,
                TemplateKey::Malformed(_) => format!("[invalid:{raw}]"),
            };
            parts.push(part);
        }
        let base = if parts.is_empty() {
            template::FALLBACK_NAME.to_string()
        } else {
            parts.join(&self.delimiter)
        };
        self.name_scheme().file_name(&base, 1)
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SaveConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value and deserialize.
///
/// Unknown keys fail here; value validation is left to the caller so that
/// presets and overrides can be applied first.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SaveConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    Ok(merged.try_into()?)
}

/// Load the config file at `path` over the stock defaults and validate it.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<SaveConfig, ConfigError> {
    let config = resolve_config(stock_defaults_value(), load_raw_config(path)?)?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `save-image.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Save Image Extended Configuration
# =================================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# File names
# ---------------------------------------------------------------------------
# Text placed before the resolved keys.
filename_prefix = "ComfyUI"

# Comma-separated keys. Each key is one of:
#   sampler_name, cfg, steps, seed, ...   an input found anywhere in the workflow
#   5.seed                                input "seed" of node 5
#   %Y-%m-%d, %F %H-%M-%S                 the save time, strftime format
filename_keys = "sampler_name, cfg, steps, %F %H-%M-%S"

# Separator between name parts and before the counter.
delimiter = "-"

# ---------------------------------------------------------------------------
# Folders (relative to the output directory)
# ---------------------------------------------------------------------------
foldername_prefix = ""

# Same keys as filename_keys, plus ./name to start a nested subfolder.
foldername_keys = "ckpt_name"

# ---------------------------------------------------------------------------
# Encoding
# ---------------------------------------------------------------------------
# One of: .avif .webp .png .jpg .jpeg .gif .tiff .bmp
output_format = ".webp"

# 1-100. Used by JPEG, WebP and AVIF; 100 is lossless for WebP and AVIF.
quality = 75

# Embed the workflow and prompts (PNG text chunks, EXIF for JPEG/WebP/AVIF).
save_metadata = true

# ---------------------------------------------------------------------------
# Counter
# ---------------------------------------------------------------------------
# Zero-padded width, 1-8.
counter_digits = 4

# "last" -> name-0001.webp, "first" -> 0001-name.webp
counter_position = "last"

# true: one counter for every file in the folder.
# false: a separate counter per base name.
one_counter_per_folder = true

# ---------------------------------------------------------------------------
# Job data
# ---------------------------------------------------------------------------
# disabled | basic | models | sampler | prompt
save_job_data = "disabled"

# true: one {name}.json per image. false: append to jobs.json.
job_data_per_image = false

# Free text added to every job data entry.
job_custom_text = ""

# Report saved files back to the host for display.
image_preview = true

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel encode workers, clamped to the number of CPU cores.
# 0 uses every core.
max_workers = 4

# ---------------------------------------------------------------------------
# Caches for template parsing and workflow lookups
# ---------------------------------------------------------------------------
[cache]
max_entries = 1000
ttl_secs = 3600
"##
}
