use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, error, info, warn, LevelFilter};

use pathoview::build_info::BuildInfo;
use pathoview::config::{Config, CONFIG, INGEST_CONFIDENCE_DECIMALS, INGEST_GEOMETRY_DECIMALS};
use pathoview::ingest::classify::{classify_labels, DEFAULT_PRIORITY, PRIORITY_TABLE};
use pathoview::ingest::{ingest_file, is_valid_threshold, IngestError, IngestOptions, IngestReport, DEFAULT_ID_PREFIX};
use pathoview::logging::{self, LogBuffer};
use pathoview::normalize::{CoordinateSpace, ImageDimensions};
use pathoview::region::{GlomerulusClass, Region};
use pathoview::settings::UserSettings;
use pathoview::store::{AnnotationStore, Dataset};

const APP_NAME: &str = "pathoview";

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pathoview")]
#[command(about = "Ingest, store and inspect glomerulus annotations for pathology images")]
#[command(version)]
struct Cli {
    /// Settings file to use instead of the per-user one.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Write the captured log lines to debug.log before exiting.
    #[arg(long, global = true)]
    export_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn an annotation export into deduplicated percent-coordinate regions.
    Ingest(IngestArgs),

    /// Show the dataset a store selects for an image key.
    Lookup {
        /// Image key, usually the file name.
        key: String,

        /// Store file (defaults to the configured store, else the built-in one).
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// List the glomerulus classes with their labels, colors and keywords.
    Classes,

    /// Print the effective settings, or write a settings template.
    Settings {
        /// Write a commented settings file (to --settings or the per-user path).
        #[arg(long)]
        init: bool,

        /// Overwrite an existing settings file with --init.
        #[arg(long, requires = "init")]
        force: bool,
    },

    /// Print the log directory.
    Logs,

    /// Print build information.
    Info,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CoordinatesArg {
    Auto,
    Pixels,
    Percent,
}

impl From<CoordinatesArg> for CoordinateSpace {
    fn from(arg: CoordinatesArg) -> Self {
        match arg {
            CoordinatesArg::Auto => CoordinateSpace::Auto,
            CoordinatesArg::Pixels => CoordinateSpace::Pixels,
            CoordinatesArg::Percent => CoordinateSpace::Percent,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct IngestArgs {
    /// Annotation export (JSON, optionally wrapped in Markdown).
    input: PathBuf,

    /// Path to write the region list (JSON). Printed to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Source image width in pixels.
    #[arg(long, requires = "image_height")]
    image_width: Option<f64>,

    /// Source image height in pixels.
    #[arg(long, requires = "image_width")]
    image_height: Option<f64>,

    /// Source image; its header provides the size when nothing else does.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Unit of the box geometry in the export.
    #[arg(long, value_enum)]
    coordinates: Option<CoordinatesArg>,

    /// Task to ingest from a multi-task export.
    #[arg(long)]
    task_id: Option<u64>,

    /// Merge distance between box centers, in source units.
    #[arg(long)]
    threshold: Option<f64>,

    /// Prefix of the generated region ids.
    #[arg(long, default_value = DEFAULT_ID_PREFIX)]
    id_prefix: String,

    /// Also store the regions as a named dataset in this store file.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Dataset name in the store (defaults to the input file stem).
    #[arg(long)]
    name: Option<String>,

    /// Image key substring selecting the dataset; repeatable (defaults to the name).
    #[arg(long = "key")]
    keys: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_buffer = match logging::setup_logger(LevelFilter::Info) {
        Ok(buffer) => {
            logging::setup_panic_hook(APP_NAME, Arc::clone(&buffer));
            Some(buffer)
        }
        Err(e) => {
            eprintln!("Failed to set up logging: {e}");
            None
        }
    };

    let result = run(&cli);

    if let Err(e) = &result {
        error!("{e}");
        eprintln!("pathoview: {e}");
    }

    if cli.export_logs {
        export_logs(log_buffer.as_ref());
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    match &cli.command {
        Commands::Ingest(args) => run_ingest(args, &load_config(cli)),
        Commands::Lookup { key, store } => run_lookup(key, store.as_deref(), &load_config(cli)),
        Commands::Classes => {
            print_classes();
            Ok(())
        }
        Commands::Settings { init, force } => run_settings(cli.settings.as_deref(), *init, *force),
        Commands::Logs => {
            println!("{}", logging::get_log_directory(APP_NAME).display());
            Ok(())
        }
        Commands::Info => {
            println!("{}", BuildInfo::detailed_info());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Config {
    match &cli.settings {
        Some(path) => Config::from_settings(&UserSettings::load(path.to_str())),
        None => CONFIG.clone(),
    }
}

fn run_ingest(args: &IngestArgs, config: &Config) -> CliResult<()> {
    let dimensions = match (args.image_width, args.image_height) {
        (Some(width), Some(height)) => Some(ImageDimensions::new(width, height)?),
        _ => None,
    };

    let threshold = args.threshold.unwrap_or(config.merge_threshold);
    if !is_valid_threshold(threshold) {
        return Err(IngestError::InvalidThreshold(threshold).into());
    }

    let options = IngestOptions {
        coordinate_space: args.coordinates.map(Into::into).unwrap_or(config.coordinate_space),
        dimensions,
        image_path: args.image.clone(),
        threshold,
        task_id: args.task_id,
        id_prefix: args.id_prefix.clone(),
    };
    debug!("Ingest options: {:?}", options);

    let report = ingest_file(&args.input, &options)?;
    report_unmatched_labels(&report);
    if report.regions.is_empty() {
        warn!("No regions survived ingestion of {}", args.input.display());
    }

    let regions: Vec<Region> = report
        .regions
        .iter()
        .map(|r| r.rounded(INGEST_GEOMETRY_DECIMALS, INGEST_CONFIDENCE_DECIMALS))
        .collect();
    let json = serde_json::to_string_pretty(&regions)?;

    // Everything that can fail on input is resolved before the first write
    let store_update = match &args.store {
        Some(store_path) => {
            let name = match &args.name {
                Some(name) => name.clone(),
                None => args
                    .input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .ok_or("cannot derive a dataset name from the input path; pass --name")?,
            };
            let keys = if args.keys.is_empty() { vec![name.clone()] } else { args.keys.clone() };
            let store = upsert_into_store(store_path, keys, Dataset::new(name, regions.clone()))?;
            Some((store_path, store))
        }
        None => None,
    };

    if let Some((store_path, store)) = store_update {
        store.save(store_path)?;
    }

    match &args.out {
        Some(out) => {
            write_file(out, &json)?;
            info!("Wrote {} region(s) to {}", regions.len(), out.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}

/// Labels that fell back to the default class, usually a typo or a new
/// label in the annotation tool
fn report_unmatched_labels(report: &IngestReport) {
    for label in &report.labels_seen {
        if classify_labels(&[label]).priority == DEFAULT_PRIORITY {
            debug!("Label {:?} matches no keyword, classified as {}", label, GlomerulusClass::Cellular);
        }
    }
}

/// The store at `path` (or the built-in one if it does not exist yet) with
/// `dataset` upserted. Nothing is written.
fn upsert_into_store(path: &Path, keys: Vec<String>, dataset: Dataset) -> CliResult<AnnotationStore> {
    let mut store = if path.exists() {
        AnnotationStore::load(path)?
    } else {
        info!("Store {} does not exist yet, starting from the built-in datasets", path.display());
        AnnotationStore::builtin()
    };
    info!("Storing dataset `{}` ({} regions) under keys {:?}", dataset.name, dataset.len(), keys);
    store.upsert(keys, dataset);
    Ok(store)
}

fn run_lookup(key: &str, store_override: Option<&Path>, config: &Config) -> CliResult<()> {
    let store = match store_override.or(config.store_path.as_deref()) {
        Some(path) => AnnotationStore::load(path)?,
        None => AnnotationStore::builtin(),
    };
    let dataset = store.select(key);
    info!("Key {:?} selects dataset `{}` ({} regions)", key, dataset.name, dataset.len());
    println!("{}", serde_json::to_string_pretty(dataset)?);
    Ok(())
}

fn print_classes() {
    for class in GlomerulusClass::ALL {
        let style = class.style();
        let keywords: Vec<String> = PRIORITY_TABLE
            .iter()
            .filter(|(_, c, _)| *c == class)
            .map(|(keyword, _, priority)| format!("{keyword} ({priority})"))
            .collect();
        let keywords = if keywords.is_empty() { "-".to_string() } else { keywords.join(", ") };
        println!("{:<11} {} {}  keywords: {}", class.as_str(), style.color.to_hex(), style.label, keywords);
    }
    println!("unmatched labels: {} (priority {})", GlomerulusClass::Cellular, DEFAULT_PRIORITY);
}

fn run_settings(custom_path: Option<&Path>, init: bool, force: bool) -> CliResult<()> {
    let path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(UserSettings::settings_path);

    if !init {
        let settings = UserSettings::load(path.to_str());
        println!("# {}", path.display());
        print!("{}", settings.to_yaml_with_comments());
        return Ok(());
    }

    if path.exists() && !force {
        return Err(format!("{} already exists; pass --force to overwrite", path.display()).into());
    }
    if force {
        // Start from a fresh template instead of patching the old file
        std::fs::remove_file(&path).ok();
    }
    UserSettings::default().save_to(&path)?;
    println!("Wrote settings template to {}", path.display());
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> CliResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, contents)?;
    Ok(())
}

fn export_logs(log_buffer: Option<&LogBuffer>) {
    let Some(buffer) = log_buffer else {
        eprintln!("Logging is not set up, nothing to export");
        return;
    };
    match logging::export_debug_logs(APP_NAME, buffer) {
        Ok(path) => eprintln!("Debug logs exported to: {}", path.display()),
        Err(e) => eprintln!("Failed to export debug logs: {e}"),
    }
}
