//! Batch colony counting from the command line.
//!
//! `colony count` uploads every image under a path into one session, runs
//! detection on the worker pool and writes the session export as CSV.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colony::{
    ColonyCounter, DetectOutcome, DetectionParams, DetectionParamsRaw, ServiceConfig, UploadFile,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const IMAGE_SUFFIXES: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

#[derive(Parser, Debug)]
#[command(author, version, about = "Soft-agar colony counter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect colonies in an image or a folder of images and export a CSV
    Count(CountArgs),
    /// Print the default detection parameters as JSON
    Defaults,
}

#[derive(Args, Debug)]
struct CountArgs {
    /// Image file or directory containing images
    #[arg(short, long)]
    input: PathBuf,

    /// Destination CSV path
    #[arg(short, long, default_value = "colony_results.csv")]
    output: PathBuf,

    /// Scan sub-directories too
    #[arg(long)]
    recursive: bool,

    /// JSON file with detection parameters; flags below override it
    #[arg(long)]
    params: Option<PathBuf>,

    /// Detection worker threads (defaults to the CPU count)
    #[arg(long)]
    threads: Option<usize>,

    #[command(flatten)]
    overrides: ParamOverrides,
}

#[derive(Args, Debug, Default)]
struct ParamOverrides {
    #[arg(long)]
    global_thresh: Option<i32>,
    #[arg(long)]
    adaptive_block_size: Option<i32>,
    #[arg(long = "adaptive-c", alias = "adaptive-C")]
    adaptive_c: Option<i32>,
    #[arg(long)]
    morph_kernel_size: Option<i32>,
    #[arg(long)]
    opening_iterations: Option<i32>,
    #[arg(long)]
    dilation_iterations: Option<i32>,
    #[arg(long)]
    closing_iterations: Option<i32>,
    #[arg(long)]
    min_area: Option<f64>,
    #[arg(long)]
    max_area: Option<f64>,
    #[arg(long)]
    clahe_clip_limit: Option<f64>,
    #[arg(long)]
    clahe_tile_grid_size: Option<i32>,
}

impl ParamOverrides {
    fn apply(&self, raw: &mut DetectionParamsRaw) {
        fn set<T: Copy>(field: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *field = value;
            }
        }
        set(&mut raw.global_thresh, self.global_thresh);
        set(&mut raw.adaptive_block_size, self.adaptive_block_size);
        set(&mut raw.adaptive_c, self.adaptive_c);
        set(&mut raw.morph_kernel_size, self.morph_kernel_size);
        set(&mut raw.opening_iterations, self.opening_iterations);
        set(&mut raw.dilation_iterations, self.dilation_iterations);
        set(&mut raw.closing_iterations, self.closing_iterations);
        set(&mut raw.min_area, self.min_area);
        set(&mut raw.max_area, self.max_area);
        set(&mut raw.clahe_clip_limit, self.clahe_clip_limit);
        set(&mut raw.clahe_tile_grid_size, self.clahe_tile_grid_size);
    }
}

/// Parameters from the optional JSON file with flag overrides, validated once.
fn resolve_params(args: &CountArgs) -> Result<DetectionParams> {
    let mut raw = match &args.params {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read parameters from {}", path.display()))?;
            serde_json::from_str::<DetectionParamsRaw>(&json)
                .with_context(|| format!("Failed to parse parameters in {}", path.display()))?
        }
        None => DetectionParamsRaw::default(),
    };
    args.overrides.apply(&mut raw);
    DetectionParams::new(raw).context("Invalid detection parameters")
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_SUFFIXES.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn walk(dir: &Path, recursive: bool, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                walk(&path, recursive, found)?;
            }
        } else if path.is_file() && is_image(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Sorted image paths under `root`, or `root` itself when it is an image file.
fn collect_images(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        if is_image(root) {
            return Ok(vec![root.to_path_buf()]);
        }
        bail!("Input file is not a supported image: {}", root.display());
    }

    let mut images = Vec::new();
    walk(root, recursive, &mut images)?;
    images.sort();
    Ok(images)
}

/// Name reported in the CSV: relative to a directory input, bare for a file input.
fn display_name(root: &Path, path: &Path) -> String {
    let relative = if root.is_dir() {
        path.strip_prefix(root).unwrap_or(path)
    } else {
        Path::new(path.file_name().unwrap_or(path.as_os_str()))
    };
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Count colonies for `args.input`, returning the number of CSV rows written.
fn run_count(args: &CountArgs) -> Result<usize> {
    let input = &args.input;
    if !input.exists() {
        bail!("Input path not found: {}", input.display());
    }
    let paths = collect_images(input, args.recursive)?;
    if paths.is_empty() {
        bail!("No images found under {}", input.display());
    }
    let params = resolve_params(args)?;

    let mut config = ServiceConfig {
        queue_capacity: paths.len(),
        ..Default::default()
    };
    if let Some(threads) = args.threads {
        config.worker_threads = threads;
    }
    let counter = ColonyCounter::new(config).context("Failed to start colony counter")?;

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        match fs::read(path) {
            Ok(bytes) => files.push(UploadFile::new(display_name(input, path), bytes)),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    let upload = counter.upload(files, None)?;
    for rejected in &upload.rejected {
        warn!("Skipping {}: {}", rejected.filename, rejected.reason);
    }
    info!(
        session = %upload.session_id,
        images = upload.images.len(),
        "Counting colonies"
    );

    let progress = ProgressBar::new(upload.images.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {wide_msg}")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );

    let mut tickets = Vec::with_capacity(upload.images.len());
    for image in &upload.images {
        let ticket = counter.submit_detect(image.image_id, params.clone(), false)?;
        tickets.push((image.filename.as_str(), ticket));
    }
    for (filename, ticket) in tickets {
        match ticket.wait() {
            Ok(DetectOutcome::Completed(response)) => {
                progress.set_message(format!("{filename}: {} colonies", response.count()));
            }
            Ok(DetectOutcome::Superseded { .. }) => {}
            Err(e) => {
                progress.suspend(|| warn!("Detection failed for {}: {}", filename, e));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    let csv = counter.export(upload.session_id)?;
    fs::write(&args.output, csv)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    Ok(upload.images.len())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Count(args) => {
            let rows = run_count(&args)?;
            println!("Wrote {} result(s) to {}", rows, args.output.display());
        }
        Command::Defaults => {
            println!(
                "{}",
                serde_json::to_string_pretty(&DetectionParams::default())?
            );
        }
    }
    Ok(())
}
