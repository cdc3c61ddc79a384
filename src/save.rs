//! Saving a batch of images.
//!
//! [`ImageSaver`] ties the pieces together. For one batch it:
//!
//! 1. takes a single timestamp, so every file of the batch resolves the same
//!    time keys;
//! 2. resolves the base file name and the folder from the templates;
//! 3. creates the folder and reserves one counter per image;
//! 4. prepares the generation metadata once;
//! 5. encodes and writes every image, in parallel for larger batches;
//! 6. exports job data for each saved image, in input order, once every
//!    worker has finished.
//!
//! ## Failure model
//!
//! Problems that affect the whole batch (unknown format, folder escaping the
//! output root, folder creation) are returned as [`SaveError`]. A single image
//! that fails to encode or write is recorded in [`BatchOutcome::failures`] and
//! the rest of the batch carries on. Job data export never fails a save.
//!
//! ## Parallel Processing
//!
//! Batches of up to [`INLINE_BATCH_LIMIT`] images are encoded on the calling
//! thread. Larger batches run on a dedicated [rayon](https://docs.rs/rayon)
//! pool sized by [`effective_threads`]. Results keep the input order.

use chrono::{Local, NaiveDateTime};
use image::DynamicImage;
use rayon::prelude::*;
use serde_json::{Map, Value, json};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::CacheStats;
use crate::config::{ConfigError, SaveConfig, effective_threads};
use crate::counter::{CounterScope, OutputCounter};
use crate::imaging::{
    EncodeError, FormatEncoder, FormatInfo, OutputFormat, Quality, TensorShape, encoder_for,
    format_info, images_from_batch,
};
use crate::jobdata::{self, JobDataError, JobDataExporter, JobRecord};
use crate::metadata::GenerationMetadata;
use crate::naming::NameScheme;
use crate::paths::{OutputRoot, PathError, PathInfo};
use crate::template::{NameKind, TemplateResolver};
use crate::types::SavedImage;
use crate::workflow::WorkflowRef;

/// Batches up to this size are encoded without a thread pool.
pub const INLINE_BATCH_LIMIT: usize = 2;

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Output path error: {0}")]
    Path(#[from] PathError),
    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Job data error: {0}")]
    JobData(#[from] JobDataError),
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
}

/// Host inputs that accompany a batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveContext<'a> {
    /// The workflow graph that produced the images.
    pub prompt: Option<&'a Value>,
    /// Extra host info, typically `{ "workflow": <editor graph> }`.
    pub extra_info: Option<&'a Map<String, Value>>,
    pub positive: &'a str,
    pub negative: &'a str,
}

/// Progress events emitted while a batch is saved.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveEvent {
    BatchStarted {
        subfolder: String,
        image_count: usize,
        format: &'static str,
    },
    ImageSaved {
        index: usize,
        filename: String,
        bytes: usize,
    },
    ImageFailed {
        index: usize,
        filename: String,
        error: String,
    },
}

/// An image of the batch that could not be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFailure {
    /// Position in the input batch.
    pub index: usize,
    pub filename: String,
    pub error: String,
}

/// Wall-clock time spent in each phase of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTimings {
    /// Name resolution, folder creation, counter and metadata.
    pub prepare: Duration,
    /// Encoding and writing every image.
    pub save: Duration,
    /// Job data files and the batch summary.
    pub job_data: Duration,
    /// Longest single encode and write.
    pub slowest_image: Duration,
}

impl BatchTimings {
    pub fn total(&self) -> Duration {
        self.prepare + self.save + self.job_data
    }
}

/// Result of one [`ImageSaver::save_images`] call.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Folder the batch was written to.
    pub folder: PathBuf,
    /// Saved images, in input order.
    pub saved: Vec<SavedImage>,
    pub failures: Vec<SaveFailure>,
    pub image_preview: bool,
    pub cache_stats: CacheStats,
    pub timings: BatchTimings,
}

impl BatchOutcome {
    /// Entries for the host's image preview; empty when preview is off.
    pub fn ui_results(&self) -> Vec<SavedImage> {
        if self.image_preview {
            self.saved.clone()
        } else {
            Vec::new()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What [`ImageSaver::clean_output`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub job_files_removed: usize,
    pub folders_removed: usize,
}

/// Everything fixed for the duration of one batch.
struct BatchPlan<'a> {
    encoder: &'a dyn FormatEncoder,
    scheme: NameScheme,
    folder: PathBuf,
    subfolder: String,
    base: String,
    first_counter: u64,
    quality: Quality,
    metadata: Option<GenerationMetadata>,
    context: SaveContext<'a>,
    timestamp: NaiveDateTime,
    events: Option<&'a Sender<SaveEvent>>,
}

impl BatchPlan<'_> {
    /// File name without extension of the image at `index`.
    fn stem(&self, index: usize) -> String {
        self.scheme.stem(&self.base, self.first_counter + index as u64)
    }
}

/// Saves image batches into an output root.
#[derive(Debug)]
pub struct ImageSaver {
    config: SaveConfig,
    root: OutputRoot,
    resolver: TemplateResolver,
    counter: OutputCounter,
    jobs: JobDataExporter,
}

impl ImageSaver {
    /// Create a saver writing below `output_dir`. The config is validated.
    pub fn new(config: SaveConfig, output_dir: impl Into<PathBuf>) -> Result<Self, SaveError> {
        config.validate()?;
        let resolver = TemplateResolver::new(config.cache.max_entries, config.cache.ttl());
        Ok(Self {
            config,
            root: OutputRoot::new(output_dir),
            resolver,
            counter: OutputCounter::new(),
            jobs: JobDataExporter::new(),
        })
    }

    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    pub fn output_root(&self) -> &OutputRoot {
        &self.root
    }

    /// Replace the configuration and drop every cache.
    pub fn update_config(&mut self, config: SaveConfig) -> Result<(), SaveError> {
        config.validate()?;
        self.resolver = TemplateResolver::new(config.cache.max_entries, config.cache.ttl());
        self.config = config;
        self.clear_caches();
        Ok(())
    }

    /// Forget parsed templates, parameter lookups and counter state.
    pub fn clear_caches(&self) {
        self.resolver.clear();
        self.counter.invalidate_all();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.stats()
    }

    /// Formats with an encoder in this build.
    pub fn supported_formats(&self) -> Vec<OutputFormat> {
        OutputFormat::ALL
            .into_iter()
            .filter(|f| format_info(*f).available)
            .collect()
    }

    /// Capabilities of the format behind `extension`, if it is known.
    pub fn format_info(&self, extension: &str) -> Option<FormatInfo> {
        OutputFormat::from_extension(extension).map(format_info)
    }

    /// Describe the output root.
    pub fn path_info(&self) -> PathInfo {
        self.root.info()
    }

    /// Prune the output root.
    ///
    /// Every folder keeps its `keep_jobs` newest per-image job files, then
    /// empty folders up to `max_depth` levels down are removed.
    pub fn clean_output(&self, keep_jobs: usize, max_depth: usize) -> Result<CleanupReport, SaveError> {
        let mut report = CleanupReport::default();
        for folder in self.root.folders() {
            report.job_files_removed += jobdata::cleanup_old_jobs(&folder, keep_jobs)?;
        }
        report.folders_removed = self.root.cleanup_empty_dirs(max_depth);
        self.counter.invalidate_all();
        info!(
            "Cleaned {}: {} job files, {} empty folders",
            self.root.path().display(),
            report.job_files_removed,
            report.folders_removed
        );
        Ok(report)
    }

    /// Where a save would go: `(file path, folder path)`. Nothing is written.
    pub fn preview_save_path(
        &self,
        prompt: Option<&Value>,
        counter: u64,
    ) -> Result<(PathBuf, PathBuf), SaveError> {
        let timestamp = Local::now().naive_local();
        let graph = prompt.unwrap_or(&Value::Null);
        let (base, folder_name) = self.resolve_names(&WorkflowRef::new(graph), &timestamp);
        let folder = self.root.folder_path(&folder_name)?;
        let file = folder.join(self.config.name_scheme().file_name(&base, counter));
        Ok((file, folder))
    }

    fn resolve_names(&self, workflow: &WorkflowRef<'_>, timestamp: &NaiveDateTime) -> (String, String) {
        let c = &self.config;
        let base = self.resolver.resolve(
            &c.filename_keys,
            &c.filename_prefix,
            &c.delimiter,
            NameKind::File,
            workflow,
            timestamp,
        );
        let folder = self.resolver.resolve(
            &c.foldername_keys,
            &c.foldername_prefix,
            &c.delimiter,
            NameKind::Folder,
            workflow,
            timestamp,
        );
        (base, folder)
    }

    /// Save a batch with the encoder of the configured format.
    pub fn save_images(
        &self,
        images: &[DynamicImage],
        context: &SaveContext<'_>,
        events: Option<Sender<SaveEvent>>,
    ) -> Result<BatchOutcome, SaveError> {
        let format = self
            .config
            .format()
            .ok_or_else(|| SaveError::UnsupportedFormat(self.config.output_format.clone()))?;
        self.save_images_with(encoder_for(format), images, context, events)
    }

    /// Save a host tensor batch (`f32` BHWC in `[0, 1]`).
    pub fn save_tensor_batch(
        &self,
        data: &[f32],
        shape: TensorShape,
        context: &SaveContext<'_>,
        events: Option<Sender<SaveEvent>>,
    ) -> Result<BatchOutcome, SaveError> {
        let images = images_from_batch(data, shape)?;
        self.save_images(&images, context, events)
    }

    /// Save a batch with a specific encoder (allows testing with mock).
    pub fn save_images_with(
        &self,
        encoder: &dyn FormatEncoder,
        images: &[DynamicImage],
        context: &SaveContext<'_>,
        events: Option<Sender<SaveEvent>>,
    ) -> Result<BatchOutcome, SaveError> {
        if images.is_empty() {
            return Ok(BatchOutcome {
                folder: self.root.path().to_path_buf(),
                image_preview: self.config.image_preview,
                cache_stats: self.resolver.stats(),
                ..BatchOutcome::default()
            });
        }

        let started = Instant::now();
        let timestamp = Local::now().naive_local();
        let graph = context.prompt.unwrap_or(&Value::Null);
        let workflow = WorkflowRef::new(graph);
        let (base, folder_name) = self.resolve_names(&workflow, &timestamp);

        let folder = self.root.create_folder(&folder_name)?;
        let scheme = self.config.name_scheme();
        let scope = CounterScope {
            scheme,
            prefix: (!self.config.one_counter_per_folder).then(|| base.clone()),
        };
        let first_counter = self.counter.reserve(&folder, &scope, images.len());
        debug!(
            "Batch of {} into {} starts at counter {}",
            images.len(),
            folder.display(),
            first_counter
        );

        let metadata = self.config.save_metadata.then(|| {
            GenerationMetadata::prepare(
                context.prompt,
                context.extra_info,
                context.positive,
                context.negative,
                &timestamp,
            )
        });

        let first_file = folder.join(scope.scheme.file_name(&base, first_counter));
        let plan = BatchPlan {
            encoder,
            subfolder: self.root.subfolder_of(&first_file),
            scheme: scope.scheme,
            folder,
            base,
            first_counter,
            quality: Quality::for_format(self.config.quality, &encoder.info()),
            metadata,
            context: *context,
            timestamp,
            events: events.as_ref(),
        };

        if let Some(tx) = plan.events {
            let _ = tx.send(SaveEvent::BatchStarted {
                subfolder: plan.subfolder.clone(),
                image_count: images.len(),
                format: encoder.info().extension,
            });
        }

        let mut timings = BatchTimings {
            prepare: started.elapsed(),
            ..BatchTimings::default()
        };
        let saving = Instant::now();
        let results = self.run_batch(&plan, images);
        timings.save = saving.elapsed();

        let mut outcome = BatchOutcome {
            folder: plan.folder.clone(),
            image_preview: self.config.image_preview,
            ..BatchOutcome::default()
        };
        let mut saved_indices = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok((saved, elapsed)) => {
                    timings.slowest_image = timings.slowest_image.max(elapsed);
                    saved_indices.push(index);
                    outcome.saved.push(saved);
                }
                Err(failure) => outcome.failures.push(failure),
            }
        }

        let exporting = Instant::now();
        if self.config.save_job_data.is_enabled() {
            // Appends to jobs.json happen here, after the workers, so records
            // keep the batch order
            for &index in &saved_indices {
                self.export_job_data(&plan, index, &images[index]);
            }
            if outcome.saved.len() > 1 {
                self.write_summary(&plan, &outcome);
            }
        }
        timings.job_data = exporting.elapsed();

        outcome.timings = timings;
        outcome.cache_stats = self.resolver.stats();
        info!(
            "Saved {} of {} images to {} in {:.2?}",
            outcome.saved.len(),
            images.len(),
            plan.folder.display(),
            timings.total()
        );
        Ok(outcome)
    }

    fn run_batch(
        &self,
        plan: &BatchPlan<'_>,
        images: &[DynamicImage],
    ) -> Vec<Result<(SavedImage, Duration), SaveFailure>> {
        if images.len() <= INLINE_BATCH_LIMIT {
            return images
                .iter()
                .enumerate()
                .map(|(i, image)| self.save_one(plan, i, image))
                .collect();
        }

        let threads = effective_threads(&self.config.processing);
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(|| {
                images
                    .par_iter()
                    .enumerate()
                    .map(|(i, image)| self.save_one(plan, i, image))
                    .collect()
            }),
            Err(e) => {
                warn!("Worker pool unavailable, saving inline: {}", e);
                images
                    .iter()
                    .enumerate()
                    .map(|(i, image)| self.save_one(plan, i, image))
                    .collect()
            }
        }
    }

    /// Encode and write one image; returns how long that took.
    fn save_one(
        &self,
        plan: &BatchPlan<'_>,
        index: usize,
        image: &DynamicImage,
    ) -> Result<(SavedImage, Duration), SaveFailure> {
        let started = Instant::now();
        let filename = format!("{}{}", plan.stem(index), plan.scheme.extension);

        let written = plan
            .encoder
            .encode(image, plan.quality, plan.metadata.as_ref())
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                fs::write(plan.folder.join(&filename), &bytes)
                    .map(|_| bytes.len())
                    .map_err(|e| format!("IO error: {e}"))
            });

        let bytes = match written {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!("Failed to save {}: {}", filename, error);
                if let Some(tx) = plan.events {
                    let _ = tx.send(SaveEvent::ImageFailed {
                        index,
                        filename: filename.clone(),
                        error: error.clone(),
                    });
                }
                return Err(SaveFailure {
                    index,
                    filename,
                    error,
                });
            }
        };

        if let Some(tx) = plan.events {
            let _ = tx.send(SaveEvent::ImageSaved {
                index,
                filename: filename.clone(),
                bytes,
            });
        }

        Ok((
            SavedImage::output(filename, plan.subfolder.clone()),
            started.elapsed(),
        ))
    }

    fn export_job_data(&self, plan: &BatchPlan<'_>, index: usize, image: &DynamicImage) {
        let options = self.config.job_data_options();
        let stem = plan.stem(index);
        let record = JobRecord {
            stem: &stem,
            prompt: plan.context.prompt,
            positive: plan.context.positive,
            negative: plan.context.negative,
            width: image.width(),
            height: image.height(),
            timestamp: &plan.timestamp,
        };
        if let Err(e) = self.jobs.export(&options, &plan.folder, &record) {
            warn!("Job data export failed for {}: {}", stem, e);
        }
    }

    fn write_summary(&self, plan: &BatchPlan<'_>, outcome: &BatchOutcome) {
        let summary = json!({
            "timestamp": plan.timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            "subfolder": plan.subfolder,
            "format": self.config.extension(),
            "image_count": outcome.saved.len() + outcome.failures.len(),
            "saved": outcome.saved.iter().map(|s| s.filename.as_str()).collect::<Vec<_>>(),
            "failed": outcome.failures.iter().map(|f| f.filename.as_str()).collect::<Vec<_>>(),
        });
        if let Err(e) = jobdata::write_batch_summary(&plan.folder, &summary) {
            warn!("Batch summary export failed in {}: {}", plan.folder.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::encoder::tests::MockEncoder;
    use crate::jobdata::{JOBS_FILE, JobDataLevel};
    use crate::naming::CounterPosition;
    use crate::test_helpers::{gradient_rgb, sample_workflow};
    use std::sync::mpsc;
    use tempfile::TempDir;

    /// Config without time keys so names are deterministic.
    fn config() -> SaveConfig {
        SaveConfig {
            filename_keys: "sampler_name, steps".into(),
            foldername_keys: "ckpt_name".into(),
            output_format: ".png".into(),
            ..SaveConfig::default()
        }
    }

    fn batch(n: u32) -> Vec<DynamicImage> {
        (0..n).map(|i| gradient_rgb(4 + i, 4)).collect()
    }

    fn names(outcome: &BatchOutcome) -> Vec<&str> {
        outcome.saved.iter().map(|s| s.filename.as_str()).collect()
    }

    // =========================================================================
    // Naming and layout
    // =========================================================================

    #[test]
    fn saves_into_resolved_folder_with_counters() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let graph = sample_workflow();
        let ctx = SaveContext {
            prompt: Some(&graph),
            ..SaveContext::default()
        };
        let encoder = MockEncoder::new();

        let outcome = saver.save_images_with(&encoder, &batch(2), &ctx, None).unwrap();

        assert_eq!(
            names(&outcome),
            vec!["ComfyUI-euler-20-0001.png", "ComfyUI-euler-20-0002.png"]
        );
        assert_eq!(outcome.saved[0].subfolder, "sd_xl_base");
        assert_eq!(outcome.folder, tmp.path().join("sd_xl_base"));
        assert!(tmp.path().join("sd_xl_base/ComfyUI-euler-20-0002.png").exists());
        assert!(outcome.is_complete());
    }

    #[test]
    fn consecutive_batches_continue_counting() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let graph = sample_workflow();
        let ctx = SaveContext {
            prompt: Some(&graph),
            ..SaveContext::default()
        };
        let encoder = MockEncoder::new();

        saver.save_images_with(&encoder, &batch(2), &ctx, None).unwrap();
        let second = saver.save_images_with(&encoder, &batch(1), &ctx, None).unwrap();
        assert_eq!(names(&second), vec!["ComfyUI-euler-20-0003.png"]);
    }

    #[test]
    fn counter_continues_after_existing_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sd_xl_base")).unwrap();
        fs::write(tmp.path().join("sd_xl_base/old-0041.png"), b"x").unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let graph = sample_workflow();
        let ctx = SaveContext {
            prompt: Some(&graph),
            ..SaveContext::default()
        };

        let outcome = saver
            .save_images_with(&MockEncoder::new(), &batch(1), &ctx, None)
            .unwrap();
        assert_eq!(names(&outcome), vec!["ComfyUI-euler-20-0042.png"]);
    }

    #[test]
    fn counter_first_position() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            counter_position: CounterPosition::First,
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let outcome = saver
            .save_images_with(&MockEncoder::new(), &batch(1), &SaveContext::default(), None)
            .unwrap();
        // No workflow: only the prefix survives
        assert_eq!(names(&outcome), vec!["0001-ComfyUI.png"]);
        assert_eq!(outcome.saved[0].subfolder, "");
    }

    #[test]
    fn per_base_name_counters() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("other-0009.png"), b"x").unwrap();
        let config = SaveConfig {
            one_counter_per_folder: false,
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let outcome = saver
            .save_images_with(&MockEncoder::new(), &batch(1), &SaveContext::default(), None)
            .unwrap();
        assert_eq!(names(&outcome), vec!["ComfyUI-0001.png"]);
    }

    #[test]
    fn nested_folder_keys() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            foldername_keys: "ckpt_name, ./sampler_name".into(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let graph = sample_workflow();
        let ctx = SaveContext {
            prompt: Some(&graph),
            ..SaveContext::default()
        };
        let outcome = saver
            .save_images_with(&MockEncoder::new(), &batch(1), &ctx, None)
            .unwrap();
        assert_eq!(outcome.saved[0].subfolder, "sd_xl_base/euler");
    }

    #[test]
    fn folder_escaping_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            foldername_prefix: "a/../../b".into(),
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path().join("out")).unwrap();
        let result = saver.save_images_with(&MockEncoder::new(), &batch(1), &SaveContext::default(), None);
        assert!(matches!(
            result,
            Err(SaveError::Path(PathError::EscapesOutputRoot(_)))
        ));
    }

    // =========================================================================
    // Batches
    // =========================================================================

    #[test]
    fn empty_batch_is_empty_outcome() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let encoder = MockEncoder::new();
        let outcome = saver
            .save_images_with(&encoder, &[], &SaveContext::default(), None)
            .unwrap();
        assert!(outcome.saved.is_empty());
        assert!(encoder.get_calls().is_empty());
    }

    #[test]
    fn large_batch_keeps_input_order() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let encoder = MockEncoder::new();
        let outcome = saver
            .save_images_with(&encoder, &batch(6), &SaveContext::default(), None)
            .unwrap();
        let expected: Vec<String> = (1..=6).map(|i| format!("ComfyUI-{i:04}.png")).collect();
        assert_eq!(names(&outcome), expected);
        assert_eq!(encoder.get_calls().len(), 6);
    }

    #[test]
    fn failed_image_does_not_stop_batch() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        // batch(3) widths are 4, 5, 6
        let encoder = MockEncoder::failing_on_width(5);
        let outcome = saver
            .save_images_with(&encoder, &batch(3), &SaveContext::default(), None)
            .unwrap();
        assert_eq!(names(&outcome), vec!["ComfyUI-0001.png", "ComfyUI-0003.png"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(outcome.failures[0].filename, "ComfyUI-0002.png");
        assert!(!outcome.is_complete());
    }

    #[test]
    fn events_report_progress() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let (tx, rx) = mpsc::channel();
        saver
            .save_images_with(&MockEncoder::new(), &batch(2), &SaveContext::default(), Some(tx))
            .unwrap();
        let events: Vec<SaveEvent> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            SaveEvent::BatchStarted { image_count: 2, .. }
        ));
        assert!(matches!(&events[1], SaveEvent::ImageSaved { index: 0, bytes: 10, .. }));
    }

    // =========================================================================
    // Quality and metadata
    // =========================================================================

    #[test]
    fn metadata_passed_when_enabled() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let encoder = MockEncoder::new();
        saver
            .save_images_with(&encoder, &batch(1), &SaveContext::default(), None)
            .unwrap();
        assert!(encoder.get_calls()[0].with_metadata);
    }

    #[test]
    fn metadata_skipped_when_disabled() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            save_metadata: false,
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let encoder = MockEncoder::new();
        saver
            .save_images_with(&encoder, &batch(1), &SaveContext::default(), None)
            .unwrap();
        assert!(!encoder.get_calls()[0].with_metadata);
    }

    #[test]
    fn quality_follows_format_rules() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            quality: 40,
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();

        // Mock has no quality knob: its default is used
        let fixed = MockEncoder::new();
        saver.save_images_with(&fixed, &batch(1), &SaveContext::default(), None).unwrap();
        assert_eq!(fixed.get_calls()[0].quality, 100);

        let mut tunable = MockEncoder::new();
        tunable.info.supports_quality = true;
        saver.save_images_with(&tunable, &batch(1), &SaveContext::default(), None).unwrap();
        assert_eq!(tunable.get_calls()[0].quality, 40);
    }

    // =========================================================================
    // Job data
    // =========================================================================

    #[test]
    fn job_data_appended_per_saved_image() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            save_job_data: JobDataLevel::Basic,
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        saver
            .save_images_with(&MockEncoder::new(), &batch(2), &SaveContext::default(), None)
            .unwrap();

        let jobs: Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join(JOBS_FILE)).unwrap()).unwrap();
        let jobs = jobs.as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1]["filename"], json!("ComfyUI-0002"));
        assert_eq!(jobs[1]["resolution"], json!("5x4"));
        assert!(tmp.path().join(jobdata::BATCH_SUMMARY_FILE).exists());
    }

    #[test]
    fn parallel_batch_job_data_in_input_order() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            save_job_data: JobDataLevel::Basic,
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let images = batch(8);
        assert!(images.len() > INLINE_BATCH_LIMIT);
        saver
            .save_images_with(&MockEncoder::new(), &images, &SaveContext::default(), None)
            .unwrap();

        let jobs: Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join(JOBS_FILE)).unwrap()).unwrap();
        let jobs = jobs.as_array().unwrap();
        let filenames: Vec<&str> = jobs.iter().map(|j| j["filename"].as_str().unwrap()).collect();
        let expected: Vec<String> = (1..=8).map(|i| format!("ComfyUI-{i:04}")).collect();
        assert_eq!(filenames, expected);
        for (i, job) in jobs.iter().enumerate() {
            assert_eq!(job["resolution"], json!(format!("{}x4", 4 + i)));
        }
    }

    #[test]
    fn failed_images_get_no_job_data() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            save_job_data: JobDataLevel::Basic,
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let encoder = MockEncoder::failing_on_width(5);
        saver
            .save_images_with(&encoder, &batch(3), &SaveContext::default(), None)
            .unwrap();

        let jobs: Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join(JOBS_FILE)).unwrap()).unwrap();
        let filenames: Vec<&str> = jobs
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["filename"].as_str().unwrap())
            .collect();
        assert_eq!(filenames, vec!["ComfyUI-0001", "ComfyUI-0003"]);
    }

    #[test]
    fn timings_cover_the_batch() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let outcome = saver
            .save_images_with(&MockEncoder::new(), &batch(3), &SaveContext::default(), None)
            .unwrap();
        let t = outcome.timings;
        assert!(t.slowest_image <= t.save);
        assert_eq!(t.total(), t.prepare + t.save + t.job_data);
        assert!(t.total() > Duration::ZERO);
    }

    #[test]
    fn clean_output_prunes_job_files_and_empty_folders() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            save_job_data: JobDataLevel::Basic,
            job_data_per_image: true,
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        saver
            .save_images_with(&MockEncoder::new(), &batch(3), &SaveContext::default(), None)
            .unwrap();
        fs::create_dir_all(tmp.path().join("stale/empty")).unwrap();
        assert!(tmp.path().join("ComfyUI-0003.json").exists());

        let report = saver.clean_output(1, 3).unwrap();
        assert_eq!(report.job_files_removed, 2);
        assert_eq!(report.folders_removed, 2);
        assert!(!tmp.path().join("stale").exists());
        assert!(tmp.path().join("ComfyUI-0003.json").exists());

        let info = saver.path_info();
        assert!(info.exists);
        // three images, one sidecar and the batch summary
        assert_eq!(info.files, 5);
        assert_eq!(info.folders, 0);
    }

    #[test]
    fn clean_output_of_missing_root_is_noop() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path().join("never")).unwrap();
        assert_eq!(saver.clean_output(0, 3).unwrap(), CleanupReport::default());
    }

    #[test]
    fn job_data_per_image_files() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            save_job_data: JobDataLevel::Prompt,
            job_data_per_image: true,
            foldername_keys: String::new(),
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let graph = sample_workflow();
        let ctx = SaveContext {
            prompt: Some(&graph),
            ..SaveContext::default()
        };
        saver
            .save_images_with(&MockEncoder::new(), &batch(1), &ctx, None)
            .unwrap();
        let data: Value = serde_json::from_str(
            &fs::read_to_string(tmp.path().join("ComfyUI-euler-20-0001.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(data["full_prompt"], graph);
        // Single image: no summary
        assert!(!tmp.path().join(jobdata::BATCH_SUMMARY_FILE).exists());
    }

    // =========================================================================
    // Results, preview and config
    // =========================================================================

    #[test]
    fn ui_results_respect_preview_flag() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let mut outcome = saver
            .save_images_with(&MockEncoder::new(), &batch(1), &SaveContext::default(), None)
            .unwrap();
        assert_eq!(outcome.ui_results().len(), 1);
        assert_eq!(outcome.ui_results()[0].kind, "output");
        outcome.image_preview = false;
        assert!(outcome.ui_results().is_empty());
    }

    #[test]
    fn preview_save_path_does_no_io() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let graph = sample_workflow();
        let (file, folder) = saver.preview_save_path(Some(&graph), 7).unwrap();
        assert_eq!(folder, tmp.path().join("sd_xl_base"));
        assert_eq!(file, folder.join("ComfyUI-euler-20-0007.png"));
        assert!(!folder.exists());
    }

    #[test]
    fn invalid_config_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            quality: 0,
            ..config()
        };
        assert!(matches!(
            ImageSaver::new(config, tmp.path()),
            Err(SaveError::Config(_))
        ));
    }

    #[test]
    fn update_config_resets_counters() {
        let tmp = TempDir::new().unwrap();
        let mut saver = ImageSaver::new(config(), tmp.path()).unwrap();
        saver
            .save_images_with(&MockEncoder::new(), &batch(1), &SaveContext::default(), None)
            .unwrap();
        saver
            .update_config(SaveConfig {
                delimiter: "_".into(),
                ..config()
            })
            .unwrap();
        let outcome = saver
            .save_images_with(&MockEncoder::new(), &batch(1), &SaveContext::default(), None)
            .unwrap();
        // The `_` scheme does not match the earlier `-` file
        assert_eq!(names(&outcome), vec!["ComfyUI_0001.png"]);
    }

    #[test]
    fn supported_formats_exclude_jxl() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let formats = saver.supported_formats();
        assert!(formats.contains(&OutputFormat::Png));
        assert!(!formats.contains(&OutputFormat::Jxl));
        assert_eq!(saver.format_info(".jpeg").unwrap().default_quality, 91);
        assert!(saver.format_info(".heic").is_none());
    }

    #[test]
    fn tensor_batch_shape_mismatch() {
        let tmp = TempDir::new().unwrap();
        let saver = ImageSaver::new(config(), tmp.path()).unwrap();
        let shape = TensorShape {
            batch: 1,
            height: 2,
            width: 2,
            channels: 3,
        };
        let result = saver.save_tensor_batch(&[0.5; 5], shape, &SaveContext::default(), None);
        assert!(matches!(
            result,
            Err(SaveError::Encode(EncodeError::InvalidInput(_)))
        ));
    }

    #[test]
    fn tensor_batch_saved_as_png() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig {
            foldername_keys: String::new(),
            save_metadata: false,
            ..config()
        };
        let saver = ImageSaver::new(config, tmp.path()).unwrap();
        let shape = TensorShape {
            batch: 1,
            height: 2,
            width: 3,
            channels: 3,
        };
        let outcome = saver
            .save_tensor_batch(&[0.5; 18], shape, &SaveContext::default(), None)
            .unwrap();
        let saved = image::open(tmp.path().join(&outcome.saved[0].filename)).unwrap();
        assert_eq!((saved.width(), saved.height()), (3, 2));
    }
}
