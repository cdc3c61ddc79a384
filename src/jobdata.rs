//! Job data sidecars.
//!
//! Next to the saved images a JSON description of the generation job can be
//! written, either one `{stem}.json` per image or one shared `jobs.json` that
//! grows by one entry per image. The detail level picks which sections are
//! included:
//!
//! | Level | Section |
//! |---|---|
//! | `basic` | `timestamp`, `resolution`, `filename_prefix` |
//! | `models` | `models`: dotted path → model file, for model-like keys |
//! | `sampler` | `sampler`: sampler settings found anywhere in the graph |
//! | `prompt` | `full_prompt`: the whole workflow graph |
//!
//! `custom_text`, `positive_prompt` and `negative_prompt` are added at every
//! level when non-empty.
//!
//! Export never fails an image save: callers log the error and carry on.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

use crate::workflow;

/// Shared sidecar name when `job_data_per_image` is off.
pub const JOBS_FILE: &str = "jobs.json";

/// Written once per multi-image batch.
pub const BATCH_SUMMARY_FILE: &str = "batch_summary.json";

/// Per-image sidecars kept per folder by cleanup unless told otherwise.
pub const DEFAULT_KEEP_JOBS: usize = 100;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Error, Debug)]
pub enum JobDataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How much of the job is written out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobDataLevel {
    #[default]
    Disabled,
    Basic,
    Models,
    Sampler,
    Prompt,
}

impl JobDataLevel {
    pub const ALL: [JobDataLevel; 5] = [
        JobDataLevel::Disabled,
        JobDataLevel::Basic,
        JobDataLevel::Models,
        JobDataLevel::Sampler,
        JobDataLevel::Prompt,
    ];

    pub fn is_enabled(self) -> bool {
        self != JobDataLevel::Disabled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobDataLevel::Disabled => "disabled",
            JobDataLevel::Basic => "basic",
            JobDataLevel::Models => "models",
            JobDataLevel::Sampler => "sampler",
            JobDataLevel::Prompt => "prompt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == value)
    }
}

impl fmt::Display for JobDataLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export settings, taken from the save configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDataOptions {
    pub level: JobDataLevel,
    pub per_image: bool,
    pub custom_text: String,
    pub filename_prefix: String,
}

/// Everything known about one saved image.
#[derive(Debug, Clone, Copy)]
pub struct JobRecord<'a> {
    /// File name without extension.
    pub stem: &'a str,
    pub prompt: Option<&'a Value>,
    pub positive: &'a str,
    pub negative: &'a str,
    pub width: u32,
    pub height: u32,
    pub timestamp: &'a NaiveDateTime,
}

/// Counts of JSON files in an output folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobDataStats {
    pub total_job_files: usize,
    pub has_jobs_file: bool,
    pub individual_files: usize,
}

/// Build the job data object for one image.
pub fn collect(options: &JobDataOptions, record: &JobRecord<'_>) -> Map<String, Value> {
    let mut data = Map::new();

    if options.level == JobDataLevel::Basic {
        data.insert(
            "timestamp".into(),
            Value::String(record.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        data.insert(
            "resolution".into(),
            Value::String(format!("{}x{}", record.width, record.height)),
        );
        data.insert(
            "filename_prefix".into(),
            Value::String(options.filename_prefix.clone()),
        );
    }
    if !options.custom_text.is_empty() {
        data.insert("custom_text".into(), Value::String(options.custom_text.clone()));
    }
    if !record.positive.is_empty() {
        data.insert("positive_prompt".into(), Value::String(record.positive.into()));
    }
    if !record.negative.is_empty() {
        data.insert("negative_prompt".into(), Value::String(record.negative.into()));
    }

    let Some(prompt) = record.prompt else {
        return data;
    };
    match options.level {
        JobDataLevel::Models => {
            let models = workflow::model_references(prompt);
            if !models.is_empty() {
                data.insert("models".into(), Value::Object(models));
            }
        }
        JobDataLevel::Sampler => {
            let sampler = workflow::sampler_settings(prompt);
            if !sampler.is_empty() {
                data.insert("sampler".into(), Value::Object(sampler));
            }
        }
        JobDataLevel::Prompt => {
            data.insert("full_prompt".into(), prompt.clone());
        }
        JobDataLevel::Basic | JobDataLevel::Disabled => {}
    }
    data
}

/// Writes job data files. Appends to `jobs.json` are serialized.
#[derive(Debug, Default)]
pub struct JobDataExporter {
    append_lock: Mutex<()>,
}

impl JobDataExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export one image's job data into `folder`.
    ///
    /// Returns the file written to, or `None` when export is disabled.
    pub fn export(
        &self,
        options: &JobDataOptions,
        folder: &Path,
        record: &JobRecord<'_>,
    ) -> Result<Option<PathBuf>, JobDataError> {
        if !options.level.is_enabled() {
            return Ok(None);
        }
        let data = collect(options, record);

        if options.per_image {
            let path = folder.join(format!("{}.json", record.stem));
            write_json(&path, &Value::Object(data))?;
            return Ok(Some(path));
        }

        let path = folder.join(JOBS_FILE);
        let mut entry = Map::new();
        entry.insert("filename".into(), Value::String(record.stem.to_string()));
        entry.extend(data);

        let _guard = self.append_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs = read_jobs(&path);
        jobs.push(Value::Object(entry));
        write_json(&path, &Value::Array(jobs))?;
        Ok(Some(path))
    }
}

/// Existing entries of a jobs file. A single object becomes a one-entry list;
/// a missing or unreadable file starts a new list.
fn read_jobs(path: &Path) -> Vec<Value> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(list)) => list,
        Ok(obj @ Value::Object(_)) => vec![obj],
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!("restarting corrupt {}: {e}", path.display());
            Vec::new()
        }
    }
}

fn write_json(path: &Path, value: &Value) -> Result<(), JobDataError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}

/// Write `batch_summary.json` into `folder`.
pub fn write_batch_summary(folder: &Path, summary: &Value) -> Result<PathBuf, JobDataError> {
    let path = folder.join(BATCH_SUMMARY_FILE);
    write_json(&path, summary)?;
    Ok(path)
}

/// Count the JSON files in `folder`. An unreadable folder counts as empty.
pub fn export_stats(folder: &Path) -> JobDataStats {
    let Ok(entries) = fs::read_dir(folder) else {
        return JobDataStats::default();
    };
    let names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".json"))
        .collect();
    let has_jobs_file = names.iter().any(|n| n == JOBS_FILE);
    JobDataStats {
        total_job_files: names.len(),
        has_jobs_file,
        individual_files: names.len() - usize::from(has_jobs_file),
    }
}

/// Delete all but the `keep` newest per-image sidecars in `folder`.
///
/// Only `.json` files are considered; `jobs.json` and `batch_summary.json`
/// are never removed. Returns the number of files deleted.
pub fn cleanup_old_jobs(folder: &Path, keep: usize) -> Result<usize, JobDataError> {
    let mut sidecars: Vec<(SystemTime, PathBuf)> = fs::read_dir(folder)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| {
            let name = e.file_name();
            let name = name.to_str()?;
            if !name.ends_with(".json") || name == JOBS_FILE || name == BATCH_SUMMARY_FILE {
                return None;
            }
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();
    if sidecars.len() <= keep {
        return Ok(0);
    }

    // Newest first, name breaks ties
    sidecars.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    let mut removed = 0;
    for (_, path) in sidecars.into_iter().skip(keep) {
        fs::remove_file(&path)?;
        debug!("removed old job data {}", path.display());
        removed += 1;
    }
    Ok(removed)
}
