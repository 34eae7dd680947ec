use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use lot3d::api::{
    CachedElevation, Detector, HttpDetector, JsonFileCache, Nominatim, OpenElevation, OsrmSnapper,
};
use lot3d::config::{ExportFormat, FileConfig};
use lot3d::domain::{Detection, Stage};
use lot3d::geometry::ImageFrame;
use lot3d::mesh::{CommandExporter, MeshExporter, StlExporter};
use lot3d::pipeline::{Collaborators, LotOutcome, Pipeline, PipelineParams};
use lot3d::store::{DocumentStore, FieldFilter, JsonDirStore, LocalObjectStore};

/// Turn detected land-parcel boundaries into metric 3D terrain assets
///
/// Examples:
///   # Register a lot from a satellite tile, detecting its boundary remotely
///   lot3d ingest --id lot-17 --lat -23.5505 --lon -46.6333 --zoom 19 --image tile.png
///
///   # Register a lot with a detection produced elsewhere
///   lot3d ingest --id lot-18 --lat -23.55 --lon -46.63 --image tile.png --detection lot-18.json
///
///   # Process every pending lot on 8 workers
///   lot3d run --workers 8
///
///   # Stop after the point file is written
///   lot3d run --until csv_exported
#[derive(Parser, Debug)]
#[command(name = "lot3d")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config file (optional, auto-searches lot3d.toml if not provided)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding lot records (overrides config)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Directory holding uploaded artifacts (overrides config)
    #[arg(long, global = true)]
    objects_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a new lot record from an overhead image
    Ingest {
        /// Record id (letters, digits, '-', '_' and '.')
        #[arg(long)]
        id: String,

        /// Latitude of the image center
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude of the image center
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Web-mercator zoom level of the image
        #[arg(long, default_value = "19")]
        zoom: u8,

        /// Pixel scale factor of the image (2 for high-DPI tiles)
        #[arg(long, default_value = "1.0")]
        scale: f64,

        /// Image width in pixels (read from the image when omitted)
        #[arg(long)]
        width: Option<u32>,

        /// Image height in pixels (read from the image when omitted)
        #[arg(long)]
        height: Option<u32>,

        /// Overhead image of the lot (PNG or JPEG)
        #[arg(long)]
        image: PathBuf,

        /// Detection JSON; the detection service is called when omitted
        #[arg(long)]
        detection: Option<PathBuf>,
    },

    /// Advance pending lots through the pipeline
    Run {
        /// Records processed concurrently
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Skip detections below this confidence
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Stop once records reach this stage
        #[arg(long)]
        until: Option<Stage>,

        /// Only process these record ids
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },

    /// Show how many records sit at each stage
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if let Some(ref config_path) = args.config {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            toml::from_str(&contents).context("Failed to parse config file")?
        } else {
            bail!("Config file not found: {:?}", config_path);
        }
    } else {
        FileConfig::load().unwrap_or_default()
    };

    if let Some(dir) = args.store_dir.clone() {
        config.store_dir = Some(dir);
    }
    if let Some(dir) = args.objects_dir.clone() {
        config.objects_dir = Some(dir);
    }

    init_logging(args.verbose || config.verbose(), args.json_logs);

    match args.command {
        Command::Ingest {
            id,
            lat,
            lon,
            zoom,
            scale,
            width,
            height,
            image,
            detection,
        } => ingest(
            &config,
            IngestArgs {
                id,
                center: (lat, lon),
                zoom,
                scale,
                width,
                height,
                image,
                detection,
            },
        ),
        Command::Run {
            workers,
            min_confidence,
            until,
            ids,
        } => {
            if let Some(workers) = workers {
                config.pipeline.workers = workers;
            }
            if let Some(min_confidence) = min_confidence {
                config.pipeline.min_confidence = min_confidence;
            }
            run(&config, until, ids)
        }
        Command::Status => status(&config),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

struct IngestArgs {
    id: String,
    center: (f64, f64),
    zoom: u8,
    scale: f64,
    width: Option<u32>,
    height: Option<u32>,
    image: PathBuf,
    detection: Option<PathBuf>,
}

fn image_extension(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok(ext),
        "jpg" | "jpeg" => Ok("jpg".to_string()),
        _ => bail!("Unsupported image type {:?}, expected PNG or JPEG", path),
    }
}

fn ingest(config: &FileConfig, args: IngestArgs) -> Result<()> {
    println!("lot3d - Lot ingest");
    println!("==================");
    println!();

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("Failed to read image: {}", args.image.display()))?;
    let extension = image_extension(&args.image)?;

    let (width, height) = match (args.width, args.height) {
        (Some(w), Some(h)) => (w, h),
        _ => {
            let decoded = image::load_from_memory(&bytes)
                .with_context(|| format!("Failed to decode image: {}", args.image.display()))?;
            (
                args.width.unwrap_or(decoded.width()),
                args.height.unwrap_or(decoded.height()),
            )
        }
    };
    let frame = ImageFrame::new(args.center, args.zoom, args.scale, width, height);

    let detection: Detection = if let Some(ref path) = args.detection {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detection file: {:?}", path))?;
        serde_json::from_str(&contents).context("Failed to parse detection file")?
    } else {
        let spinner = create_spinner("Detecting lot boundary...");
        let start = Instant::now();
        let detector = HttpDetector::new(&config.detection)?;
        let Some(detection) = detector.detect(&bytes)? else {
            spinner.finish_and_clear();
            bail!("No lot detected in {}", args.image.display());
        };
        spinner.finish_with_message(format!(
            "Detected {}-point boundary, confidence {:.2} [{:.1}s]",
            detection.polygon.len(),
            detection.confidence,
            start.elapsed().as_secs_f32()
        ));
        detection
    };

    if detection.polygon.len() < 3 || !detection.is_normalized() {
        bail!("Detection polygon must have at least 3 points inside the unit square");
    }

    let (collab, _) = collaborators(config)?;
    if collab.store.get(&args.id)?.is_some() {
        bail!("Record {} already exists", args.id);
    }
    let pipeline = Pipeline::new(collab, PipelineParams::from_config(config));
    pipeline.ingest(&args.id, frame, detection, Some((&extension, &bytes)))?;

    println!(
        "Stored lot {} ({}x{} px, zoom {}) in {}",
        args.id,
        width,
        height,
        args.zoom,
        config.store_dir().display()
    );
    Ok(())
}

fn build_exporter(config: &FileConfig) -> Result<Arc<dyn MeshExporter>> {
    let min_bytes = config.terrain.min_output_bytes;
    Ok(match config.export.format {
        ExportFormat::Stl => Arc::new(StlExporter::new(min_bytes)),
        ExportFormat::Command => {
            let Some(program) = config.export.program.clone() else {
                bail!("[export] format = \"command\" requires a program");
            };
            Arc::new(CommandExporter {
                program,
                args: config.export.args.clone(),
                extension: config.export.extension.clone(),
                timeout: Duration::from_secs(config.export.timeout_secs),
                min_bytes,
            })
        }
    })
}

type Elevation = CachedElevation<OpenElevation, JsonFileCache>;

/// Services backed by the local directories and HTTP endpoints in `config`
fn collaborators(config: &FileConfig) -> Result<(Collaborators, Arc<Elevation>)> {
    let cache = JsonFileCache::open(&config.store_dir().join("elevation-cache.json"))?;
    let elevation = Arc::new(CachedElevation::new(
        OpenElevation::new(&config.elevation)?,
        cache,
    ));

    let collab = Collaborators {
        store: Arc::new(JsonDirStore::open(&config.store_dir())?),
        objects: Arc::new(LocalObjectStore::open(&config.objects_dir())?),
        elevation: elevation.clone(),
        snapper: Arc::new(OsrmSnapper::new(&config.routing)?),
        geocoder: Some(Arc::new(Nominatim::new(&config.geocoding)?)),
        exporter: build_exporter(config)?,
    };
    Ok((collab, elevation))
}

fn run(config: &FileConfig, until: Option<Stage>, ids: Vec<String>) -> Result<()> {
    let total_start = Instant::now();

    println!("lot3d - Terrain pipeline");
    println!("========================");
    println!();

    let store_dir = config.store_dir();
    let (collab, elevation) = collaborators(config)?;
    let pipeline = Pipeline::new(collab, PipelineParams::from_config(config));

    let ids = if ids.is_empty() { pipeline.pending()? } else { ids };
    if ids.is_empty() {
        println!("Nothing to do: no pending lots in {}", store_dir.display());
        return Ok(());
    }

    let workers = config.pipeline.workers;
    println!(
        "Processing {} lots on {} workers{}",
        ids.len(),
        workers,
        until.map(|s| format!(", stopping at {}", s)).unwrap_or_default()
    );

    let progress = ProgressBar::new(ids.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    progress.enable_steady_tick(Duration::from_millis(80));

    let on_done = |id: &str, outcome: &LotOutcome| {
        if let LotOutcome::Failed { stage, .. } = outcome {
            progress.println(format!("  {} failed at {}", id, stage));
        }
        progress.set_message(id.to_string());
        progress.inc(1);
    };
    let report = pipeline.run_batch(&ids, workers, until, &on_done)?;
    progress.finish_and_clear();

    if let Err(e) = elevation.cache().flush() {
        tracing::warn!(error = %e, "Failed to write elevation cache");
    }

    println!();
    println!("========================");
    println!("Completed: {}", report.completed);
    if until.is_some() {
        println!("Advanced:  {}", report.advanced);
    }
    println!("Unchanged: {}", report.unchanged);
    println!("Skipped:   {}", report.skipped);
    println!("Failed:    {}", report.failed);
    for (id, message) in &report.failures {
        println!("  {}: {}", id, message);
    }
    println!("Total time: {:.1}s", total_start.elapsed().as_secs_f32());

    Ok(())
}

fn status(config: &FileConfig) -> Result<()> {
    let (collab, _) = collaborators(config)?;
    let store = collab.store.clone();
    let pipeline = Pipeline::new(collab, PipelineParams::from_config(config));

    let counts = pipeline.status()?;
    let total = store.ids()?.len();
    println!("{} lots in {}", total, config.store_dir().display());
    for (stage, n) in &counts {
        println!("  {:<22} {}", stage, n);
    }
    let staged: usize = counts.values().sum();
    if staged < total {
        println!("  {:<22} {}", "invalid", total - staged);
    }

    let failed = store.find(&FieldFilter::new().exists("failure"))?;
    if !failed.is_empty() {
        println!();
        println!("Last failures:");
        for id in failed {
            if let Some(failure) = store.get(&id)?.and_then(|r| r.failure) {
                println!("  {} at {}: {}", id, failure.stage, failure.message);
            }
        }
    }
    Ok(())
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
