use areadet::batch::open_all;
use areadet::edf::EdfImage;
use areadet::registry::magic::PREFIX_LEN;
use areadet::series::{Addressing, FileSeries, SeriesOptions};
use areadet::{FormatRegistry, ImageError, OpenOptions};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "areadet", about = "Inspect area-detector image files")]
struct Cli {
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected format of each file
    Detect {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Codec, frame count and first-frame layout of each file
    Info {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print one frame header as JSON
    Header {
        input: PathBuf,
        #[arg(short, long, default_value = "0")]
        frame: usize,
        /// Print the EDF general block instead of a frame header
        #[arg(long)]
        general: bool,
    },
    /// Resolve a numbered file series starting at FIRST
    Series {
        first: PathBuf,
        /// Every file holds exactly one frame
        #[arg(long, conflicts_with = "per_file")]
        single: bool,
        /// Every file holds this many frames (the last may hold fewer)
        #[arg(long)]
        per_file: Option<usize>,
    },
}

// ── Logging ──────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn  => LevelFilter::WARN,
            LogLevel::Info  => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);
    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);
    let registry = FormatRegistry::with_defaults();

    match cli.command {

        // ── Detect ───────────────────────────────────────────────────────────
        Commands::Detect { input } => {
            for path in &input {
                match registry.detect_path(path) {
                    Ok(format) => println!("{:<12} {}", format, path.display()),
                    Err(ImageError::UnidentifiableFormat(_)) => {
                        println!("{:<12} {}  [{}]", "?", path.display(), prefix_hex(path)?);
                    }
                    Err(e) => println!("{:<12} {}  ({e})", "error", path.display()),
                }
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let results = open_all(&registry, &input, &OpenOptions::default());
            if json {
                let rows = results
                    .iter()
                    .zip(&input)
                    .map(|(r, path)| match r {
                        Ok(summary) => serde_json::to_value(summary),
                        Err(e) => Ok(serde_json::json!({ "path": path, "error": e.to_string() })),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:<8} {:>7} {:<10} {:<8} {:<14} Path", "Codec", "Frames", "Complete", "Type", "Shape");
                for (r, path) in results.iter().zip(&input) {
                    match r {
                        Ok(s) => println!(
                            "{:<8} {:>7} {:<10} {:<8} {:<14} {}",
                            s.codec,
                            s.nframes,
                            if s.incomplete { "no" } else { "yes" },
                            s.dtype.map_or("-", |d| d.name()),
                            s.shape.as_ref().map_or_else(|| "-".to_string(), |s| format!("{s:?}")),
                            path.display(),
                        ),
                        Err(e) => println!("{:<8} {:>7} {:<10} {:<8} {:<14} {}  ({e})", "-", "-", "-", "-", "-", path.display()),
                    }
                }
            }
        }

        // ── Header ───────────────────────────────────────────────────────────
        Commands::Header { input, frame, general } => {
            if general {
                let image = EdfImage::open(&input, &OpenOptions::default().edf)?;
                let header = image.general_header().cloned().unwrap_or_default();
                println!("{}", serde_json::to_string_pretty(&header)?);
            } else {
                let mut container = registry.open(&input, &OpenOptions::default())?;
                let f = container.get_frame(frame)?;
                println!("{}", serde_json::to_string_pretty(f.header())?);
            }
        }

        // ── Series ───────────────────────────────────────────────────────────
        Commands::Series { first, single, per_file } => {
            let addressing = match (single, per_file) {
                (true, _) => Addressing::SingleFrame,
                (false, Some(n)) => Addressing::FixedFrameCount(Some(n)),
                (false, None) => Addressing::General,
            };
            let options = SeriesOptions { addressing, ..Default::default() };
            let mut series = FileSeries::from_first(Arc::new(registry), &first, options)?;
            let total = series.nframes()?;
            println!("{total} frames");
            if addressing == Addressing::General {
                for d in series.file_descriptors() {
                    println!("  {:>5} {:>7}+{:<5} {}", d.ordinal, d.first_frame, d.nframes, d.filename.display());
                }
            }
            if series.info().is_incomplete() {
                println!("  (some files could not be read)");
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn prefix_hex(path: &Path) -> std::io::Result<String> {
    let mut prefix = Vec::with_capacity(PREFIX_LEN);
    std::fs::File::open(path)?.take(PREFIX_LEN as u64).read_to_end(&mut prefix)?;
    Ok(hex::encode(prefix))
}
