//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Save
//!
//! ```text
//! sd_xl_base/ (3 images, .webp)
//!     001 ComfyUI-euler-20-0001.webp (48.2 KB)
//!     002 ComfyUI-euler-20-0002.webp (47.9 KB)
//!     003 ComfyUI-euler-20-0003.webp FAILED: Encoding failed: ...
//!
//! Saved 2 of 3 images to output/sd_xl_base
//! Cache: 4 cached, 3 resolved (7 total)
//! Time: 1.42s (prepare 3.10ms, save 1.41s, job data 0.00ns; slowest image 702.33ms)
//! ```
//!
//! ## Clean
//!
//! ```text
//! Removed 12 job files and 3 empty folders
//! output: 148 files in 9 folders, 61.3 MB, writable
//! ```
//!
//! ## Check
//!
//! ```text
//! Errors
//!     quality must be between 1 and 100
//! Warnings
//!     a short delimiter such as - or _ is recommended
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::config::{Preset, ValidationReport};
use crate::imaging::{FormatInfo, OutputFormat};
use crate::paths::PathInfo;
use crate::save::{BatchOutcome, BatchTimings, CleanupReport, SaveEvent};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 0-based batch index as a 1-based, 3-digit position.
fn format_index(index: usize) -> String {
    format!("{:0>3}", index + 1)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn human_size(bytes: usize) -> String {
    match bytes {
        0..1024 => format!("{bytes} B"),
        1024..1_048_576 => format!("{:.1} KB", bytes as f64 / 1024.0),
        _ => format!("{:.1} MB", bytes as f64 / 1_048_576.0),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

// ============================================================================
// Save
// ============================================================================

/// Format a single save progress event as display lines.
pub fn format_save_event(event: &SaveEvent) -> Vec<String> {
    match event {
        SaveEvent::BatchStarted {
            subfolder,
            image_count,
            format,
        } => {
            let folder = if subfolder.is_empty() {
                "./".to_string()
            } else {
                format!("{subfolder}/")
            };
            let noun = if *image_count == 1 { "image" } else { "images" };
            vec![format!("{folder} ({image_count} {noun}, {format})")]
        }
        SaveEvent::ImageSaved {
            index,
            filename,
            bytes,
        } => vec![format!(
            "{}{} {} ({})",
            indent(1),
            format_index(*index),
            filename,
            human_size(*bytes)
        )],
        SaveEvent::ImageFailed {
            index,
            filename,
            error,
        } => vec![format!(
            "{}{} {} FAILED: {}",
            indent(1),
            format_index(*index),
            filename,
            error
        )],
    }
}

/// Summary lines after a batch.
pub fn format_batch_outcome(outcome: &BatchOutcome) -> Vec<String> {
    let total = outcome.saved.len() + outcome.failures.len();
    let mut lines = vec![
        String::new(),
        format!(
            "Saved {} of {} images to {}",
            outcome.saved.len(),
            total,
            outcome.folder.display()
        ),
    ];
    for failure in &outcome.failures {
        lines.push(format!(
            "{}{} {}: {}",
            indent(1),
            format_index(failure.index),
            failure.filename,
            failure.error
        ));
    }
    lines.push(format!("Cache: {}", outcome.cache_stats));
    lines.push(format_timings(&outcome.timings));
    lines
}

fn format_timings(t: &BatchTimings) -> String {
    format!(
        "Time: {:.2?} (prepare {:.2?}, save {:.2?}, job data {:.2?}; slowest image {:.2?})",
        t.total(),
        t.prepare,
        t.save,
        t.job_data,
        t.slowest_image
    )
}

pub fn print_batch_outcome(outcome: &BatchOutcome) {
    for line in format_batch_outcome(outcome) {
        println!("{}", line);
    }
}

// ============================================================================
// Clean / info
// ============================================================================

/// One line describing the output root.
pub fn format_path_info(info: &PathInfo) -> Vec<String> {
    let root = info.root.display();
    if !info.exists {
        return vec![format!("{root}: does not exist")];
    }
    let files = if info.files == 1 { "file" } else { "files" };
    let folders = if info.folders == 1 { "folder" } else { "folders" };
    vec![format!(
        "{root}: {} {files} in {} {folders}, {}, {}",
        info.files,
        info.folders,
        human_size(info.total_bytes as usize),
        if info.writable { "writable" } else { "read-only" }
    )]
}

pub fn print_path_info(info: &PathInfo) {
    for line in format_path_info(info) {
        println!("{}", line);
    }
}

/// What a cleanup removed, then the state of the root afterwards.
pub fn format_cleanup(report: &CleanupReport, info: &PathInfo) -> Vec<String> {
    let mut lines = vec![format!(
        "Removed {} job files and {} empty folders",
        report.job_files_removed, report.folders_removed
    )];
    lines.extend(format_path_info(info));
    lines
}

pub fn print_cleanup(report: &CleanupReport, info: &PathInfo) {
    for line in format_cleanup(report, info) {
        println!("{}", line);
    }
}

// ============================================================================
// Check / preview
// ============================================================================

/// Errors and warnings of a validation report.
pub fn format_validation(report: &ValidationReport) -> Vec<String> {
    if report.errors.is_empty() && report.warnings.is_empty() {
        return vec!["Config OK".to_string()];
    }
    let mut lines = Vec::new();
    for (title, messages) in [("Errors", &report.errors), ("Warnings", &report.warnings)] {
        if messages.is_empty() {
            continue;
        }
        lines.push(title.to_string());
        lines.extend(messages.iter().map(|m| format!("{}{}", indent(1), m)));
    }
    lines
}

pub fn print_validation(report: &ValidationReport) {
    for line in format_validation(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Presets / formats
// ============================================================================

pub fn format_presets(presets: &[Preset]) -> Vec<String> {
    let mut lines = Vec::new();
    for preset in presets {
        lines.push(format!("{} - {}", preset.name, preset.description));
        lines.push(format!("{}filename_keys:   {}", indent(1), preset.filename_keys));
        lines.push(format!("{}foldername_keys: {}", indent(1), preset.foldername_keys));
        lines.push(format!("{}delimiter:       {:?}", indent(1), preset.delimiter));
    }
    lines
}

pub fn print_presets(presets: &[Preset]) {
    for line in format_presets(presets) {
        println!("{}", line);
    }
}

/// One line per format with its capabilities.
pub fn format_formats(formats: &[(OutputFormat, FormatInfo)]) -> Vec<String> {
    formats
        .iter()
        .map(|(format, info)| {
            if !info.available {
                return format!("{:<6} {:<8} not available in this build", info.extension, format.name());
            }
            let quality = if info.supports_quality {
                format!("quality (default {})", info.default_quality)
            } else {
                "fixed quality".to_string()
            };
            format!(
                "{:<6} {:<8} {}, lossless: {}, metadata: {}",
                info.extension,
                format.name(),
                quality,
                yes_no(info.supports_lossless),
                yes_no(info.supports_metadata)
            )
        })
        .collect()
}

pub fn print_formats(formats: &[(OutputFormat, FormatInfo)]) {
    for line in format_formats(formats) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStats;
    use crate::config::PRESETS;
    use crate::imaging::format_info;
    use crate::save::SaveFailure;
    use crate::types::SavedImage;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn format_index_is_one_based() {
        assert_eq!(format_index(0), "001");
        assert_eq!(format_index(41), "042");
        assert_eq!(format_index(999), "1000");
    }

    #[test]
    fn indent_levels() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn human_size_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(3 * 1_048_576), "3.0 MB");
    }

    // =========================================================================
    // Save events
    // =========================================================================

    #[test]
    fn batch_started_line() {
        let event = SaveEvent::BatchStarted {
            subfolder: "sd_xl_base".into(),
            image_count: 3,
            format: ".webp",
        };
        assert_eq!(format_save_event(&event), vec!["sd_xl_base/ (3 images, .webp)"]);
    }

    #[test]
    fn batch_started_in_root() {
        let event = SaveEvent::BatchStarted {
            subfolder: String::new(),
            image_count: 1,
            format: ".png",
        };
        assert_eq!(format_save_event(&event), vec!["./ (1 image, .png)"]);
    }

    #[test]
    fn image_saved_line() {
        let event = SaveEvent::ImageSaved {
            index: 0,
            filename: "a-0001.png".into(),
            bytes: 2048,
        };
        assert_eq!(format_save_event(&event), vec!["    001 a-0001.png (2.0 KB)"]);
    }

    #[test]
    fn image_failed_line() {
        let event = SaveEvent::ImageFailed {
            index: 2,
            filename: "a-0003.png".into(),
            error: "disk full".into(),
        };
        assert_eq!(
            format_save_event(&event),
            vec!["    003 a-0003.png FAILED: disk full"]
        );
    }

    #[test]
    fn batch_outcome_summary() {
        let outcome = BatchOutcome {
            folder: PathBuf::from("output/sd"),
            saved: vec![SavedImage::output("a-0001.png", "sd")],
            failures: vec![SaveFailure {
                index: 1,
                filename: "a-0002.png".into(),
                error: "boom".into(),
            }],
            image_preview: true,
            cache_stats: CacheStats {
                hits: 0,
                misses: 3,
                evictions: 0,
            },
            timings: BatchTimings {
                prepare: Duration::from_millis(5),
                save: Duration::from_millis(1245),
                job_data: Duration::ZERO,
                slowest_image: Duration::from_millis(250),
            },
        };
        let lines = format_batch_outcome(&outcome);
        assert_eq!(lines[1], "Saved 1 of 2 images to output/sd");
        assert_eq!(lines[2], "    002 a-0002.png: boom");
        assert_eq!(lines[3], "Cache: 3 resolved");
        assert_eq!(
            lines[4],
            "Time: 1.25s (prepare 5.00ms, save 1.25s, job data 0.00ns; slowest image 250.00ms)"
        );
    }

    // =========================================================================
    // Clean / info
    // =========================================================================

    #[test]
    fn path_info_line() {
        let info = PathInfo {
            root: PathBuf::from("output"),
            exists: true,
            writable: true,
            folders: 1,
            files: 3,
            total_bytes: 2048,
        };
        assert_eq!(
            format_path_info(&info),
            vec!["output: 3 files in 1 folder, 2.0 KB, writable"]
        );
    }

    #[test]
    fn path_info_missing_root() {
        let info = PathInfo {
            root: PathBuf::from("output"),
            ..PathInfo::default()
        };
        assert_eq!(format_path_info(&info), vec!["output: does not exist"]);
    }

    #[test]
    fn cleanup_lines() {
        let report = CleanupReport {
            job_files_removed: 12,
            folders_removed: 3,
        };
        let info = PathInfo {
            root: PathBuf::from("out"),
            exists: true,
            writable: false,
            ..PathInfo::default()
        };
        assert_eq!(
            format_cleanup(&report, &info),
            vec![
                "Removed 12 job files and 3 empty folders",
                "out: 0 files in 0 folders, 0 B, read-only"
            ]
        );
    }

    // =========================================================================
    // Check / presets / formats
    // =========================================================================

    #[test]
    fn validation_ok() {
        assert_eq!(format_validation(&ValidationReport::default()), vec!["Config OK"]);
    }

    #[test]
    fn validation_errors_and_warnings() {
        let report = ValidationReport {
            errors: vec!["bad quality".into()],
            warnings: vec!["odd delimiter".into()],
        };
        assert_eq!(
            format_validation(&report),
            vec!["Errors", "    bad quality", "Warnings", "    odd delimiter"]
        );
    }

    #[test]
    fn validation_warnings_only() {
        let report = ValidationReport {
            errors: vec![],
            warnings: vec!["odd delimiter".into()],
        };
        assert_eq!(format_validation(&report), vec!["Warnings", "    odd delimiter"]);
    }

    #[test]
    fn presets_listing() {
        let lines = format_presets(PRESETS);
        assert_eq!(lines.len(), PRESETS.len() * 4);
        assert!(lines[0].starts_with("simple - "));
        assert!(lines.iter().any(|l| l.contains("./sampler_name")));
    }

    #[test]
    fn formats_listing() {
        let formats: Vec<_> = OutputFormat::ALL
            .into_iter()
            .map(|f| (f, format_info(f)))
            .collect();
        let lines = format_formats(&formats);
        assert_eq!(lines.len(), OutputFormat::ALL.len());
        let jpeg = lines.iter().find(|l| l.starts_with(".jpg")).unwrap();
        assert!(jpeg.contains("quality (default 91)"));
        assert!(jpeg.contains("lossless: no"));
        let jxl = lines.iter().find(|l| l.starts_with(".jxl")).unwrap();
        assert!(jxl.ends_with("not available in this build"));
    }
}
