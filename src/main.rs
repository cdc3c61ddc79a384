use clap::{Parser, Subcommand};
use save_image_extended::config::{self, SaveConfig};
use save_image_extended::imaging::{OutputFormat, format_info};
use save_image_extended::paths::DEFAULT_CLEANUP_DEPTH;
use save_image_extended::save::{ImageSaver, SaveContext};
use save_image_extended::{jobdata, output};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Input extensions the `save` command decodes.
const READABLE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp", "tif", "tiff"];

/// Naming and encoding overrides, applied over the config file and preset.
#[derive(clap::Args, Clone, Default)]
struct NamingArgs {
    /// Apply a preset (see `presets`) before the overrides below
    #[arg(long)]
    preset: Option<String>,

    /// Output format extension, e.g. .png
    #[arg(long)]
    format: Option<String>,

    /// Encoding quality 1-100
    #[arg(long)]
    quality: Option<u32>,

    /// Comma-separated filename keys
    #[arg(long)]
    filename_keys: Option<String>,

    /// Comma-separated folder keys
    #[arg(long)]
    foldername_keys: Option<String>,

    /// Filename prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Delimiter between name parts
    #[arg(long)]
    delimiter: Option<String>,
}

/// Workflow inputs that accompany the images.
#[derive(clap::Args, Clone, Default)]
struct PromptArgs {
    /// Workflow graph as JSON
    #[arg(long)]
    prompt: Option<String>,
}

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "save-image")]
#[command(about = "Save generated images under templated names with embedded metadata")]
#[command(long_about = "\
Save generated images under templated names with embedded metadata

File and folder names are built from comma-separated key lists:

  sampler_name, cfg, steps     inputs found anywhere in the workflow
  5.seed                       input \"seed\" of node 5
  %Y-%m-%d, %F %H-%M-%S        the save time (strftime)
  ./name                       nested subfolder (folder keys only)

Example:

  save-image save render.png --prompt \"$(cat prompt.json)\" \\
      --filename-keys \"sampler_name, steps\" --foldername-keys \"%Y-%m-%d, ./ckpt_name\"

  → output/2024-01-15/sd_xl_base/ComfyUI-euler-20-0001.webp

Run 'save-image gen-config' to generate a documented save-image.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Output root directory
    #[arg(long, default_value = "output", global = true)]
    output: PathBuf,

    /// Config file, used when it exists
    #[arg(long, default_value = "save-image.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save images (files or directories) as one batch
    Save {
        /// Image files or directories of images
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        prompt: PromptArgs,

        /// Extra host info as a JSON object, e.g. {"workflow": {...}}
        #[arg(long)]
        extra_info: Option<String>,

        /// Positive prompt text
        #[arg(long, default_value = "")]
        positive: String,

        /// Negative prompt text
        #[arg(long, default_value = "")]
        negative: String,

        #[command(flatten)]
        naming: NamingArgs,

        /// Print the saved files as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Show the file name and folder the current settings produce
    Preview {
        #[command(flatten)]
        prompt: PromptArgs,

        #[command(flatten)]
        naming: NamingArgs,
    },
    /// Validate the configuration
    Check {
        #[command(flatten)]
        naming: NamingArgs,
    },
    /// Drop old per-image job files and empty folders from the output root
    Clean {
        /// Per-image job files kept in each folder, newest first
        #[arg(long, default_value_t = jobdata::DEFAULT_KEEP_JOBS)]
        keep_jobs: usize,

        /// Folder levels below the output root searched for empty folders
        #[arg(long, default_value_t = DEFAULT_CLEANUP_DEPTH)]
        max_depth: usize,
    },
    /// Describe the output root: existence, permissions, files and size
    Info,
    /// List naming presets
    Presets,
    /// List output formats and their capabilities
    Formats,
    /// Print a stock save-image.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Save {
            inputs,
            prompt,
            extra_info,
            positive,
            negative,
            naming,
            json,
        } => {
            let config = build_config(&cli.config, &naming)?;
            let job_data = config.save_job_data;
            let saver = ImageSaver::new(config, &cli.output)?;
            let graph = parse_prompt(&prompt)?;
            let extra: Option<Map<String, Value>> =
                extra_info.as_deref().map(serde_json::from_str).transpose()?;
            let images = load_images(&inputs)?;

            let context = SaveContext {
                prompt: graph.as_ref(),
                extra_info: extra.as_ref(),
                positive: &positive,
                negative: &negative,
            };

            if json {
                let outcome = saver.save_images(&images, &context, None)?;
                println!("{}", serde_json::to_string_pretty(&outcome.ui_results())?);
                return Ok(());
            }

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_save_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let outcome = saver.save_images(&images, &context, Some(tx))?;
            printer.join().map_err(|_| "progress printer panicked")?;
            output::print_batch_outcome(&outcome);
            if job_data.is_enabled() {
                let stats = jobdata::export_stats(&outcome.folder);
                println!(
                    "Job data: {} files ({} per image{})",
                    stats.total_job_files,
                    stats.individual_files,
                    if stats.has_jobs_file { ", jobs.json" } else { "" }
                );
            }
        }
        Command::Preview { prompt, naming } => {
            let config = build_config(&cli.config, &naming)?;
            let sample_name = config.preview_filename(
                &config::default_preview_sample(),
                &chrono::Local::now().naive_local(),
            );
            let saver = ImageSaver::new(config, &cli.output)?;
            let graph = parse_prompt(&prompt)?;
            let (file, folder) = saver.preview_save_path(graph.as_ref(), 1)?;
            println!("Folder: {}", folder.display());
            println!("File:   {}", file.display());
            if graph.is_none() {
                println!("Sample: {}", sample_name);
            }
        }
        Command::Check { naming } => {
            let config = build_config(&cli.config, &naming)?;
            let report = config.validate_report();
            output::print_validation(&report);
            if !report.is_valid() {
                return Err(format!("{} configuration error(s)", report.errors.len()).into());
            }
        }
        Command::Clean {
            keep_jobs,
            max_depth,
        } => {
            let saver = ImageSaver::new(build_config(&cli.config, &NamingArgs::default())?, &cli.output)?;
            let report = saver.clean_output(keep_jobs, max_depth)?;
            output::print_cleanup(&report, &saver.path_info());
        }
        Command::Info => {
            let saver = ImageSaver::new(build_config(&cli.config, &NamingArgs::default())?, &cli.output)?;
            output::print_path_info(&saver.path_info());
        }
        Command::Presets => {
            output::print_presets(config::PRESETS);
        }
        Command::Formats => {
            let formats: Vec<_> = OutputFormat::ALL
                .into_iter()
                .map(|f| (f, format_info(f)))
                .collect();
            output::print_formats(&formats);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Stock defaults, then the config file, then the preset, then overrides.
fn build_config(path: &Path, naming: &NamingArgs) -> Result<SaveConfig, config::ConfigError> {
    let overlay = config::load_raw_config(path)?;
    let mut config = config::resolve_config(config::stock_defaults_value(), overlay)?;
    if let Some(preset) = &naming.preset {
        config.apply_preset(preset)?;
    }
    if let Some(format) = &naming.format {
        config.output_format = format.clone();
    }
    if let Some(quality) = naming.quality {
        config.quality = quality;
    }
    if let Some(keys) = &naming.filename_keys {
        config.filename_keys = keys.clone();
    }
    if let Some(keys) = &naming.foldername_keys {
        config.foldername_keys = keys.clone();
    }
    if let Some(prefix) = &naming.prefix {
        config.filename_prefix = prefix.clone();
    }
    if let Some(delimiter) = &naming.delimiter {
        config.delimiter = delimiter.clone();
    }
    Ok(config)
}

fn parse_prompt(args: &PromptArgs) -> Result<Option<Value>, serde_json::Error> {
    args.prompt.as_deref().map(serde_json::from_str).transpose()
}

fn is_readable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| READABLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Decode every image in `inputs`, walking directories in name order.
///
/// Files that fail to decode are skipped with a warning.
fn load_images(inputs: &[PathBuf]) -> Result<Vec<image::DynamicImage>, Box<dyn std::error::Error>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            paths.extend(
                WalkDir::new(input)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && is_readable(e.path()))
                    .map(|e| e.into_path()),
            );
        } else {
            paths.push(input.clone());
        }
    }

    let mut images = Vec::with_capacity(paths.len());
    for path in &paths {
        match image::open(path) {
            Ok(img) => images.push(img),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    if images.is_empty() {
        return Err("no readable images in the given inputs".into());
    }
    Ok(images)
}
