use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use vitals_core::*;

#[derive(Parser)]
#[command(name = "vitals")]
#[command(about = "Health export analyzer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an unpacked export folder or an export document
    Import {
        path: PathBuf,

        /// Run ingestion on a background worker thread
        #[arg(long)]
        worker: bool,

        /// Only analyze a prefix of very large documents
        #[arg(long)]
        sample_large: bool,

        /// Write the full result as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write the per-metric table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Save summary.json and metrics.csv into the data directory
        #[arg(long)]
        save: bool,

        /// Number of metrics in the ranking
        #[arg(long)]
        top: Option<usize>,

        /// Do not print progress
        #[arg(short, long)]
        quiet: bool,
    },

    /// List every record and workout of a document
    Records { path: PathBuf },

    /// Show the waveform recording of an electrocardiogram file
    Ecg { path: PathBuf },

    /// Show the track points of a route file
    Route { path: PathBuf },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        vitals_core::logging::init_with_level("debug");
    } else {
        vitals_core::logging::init();
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_config_path);

    if let Commands::Config { init } = cli.command {
        return cmd_config(&config_path, init);
    }

    let config = if cli.config.is_some() {
        Config::load_from(&config_path)?
    } else {
        Config::load()?
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match cli.command {
        Commands::Import {
            path,
            worker,
            sample_large,
            json,
            csv,
            save,
            top,
            quiet,
        } => {
            let mut config = config;
            if sample_large {
                config.ingest.large_member_strategy = LargeMemberStrategy::Sample;
            }
            if let Some(top) = top {
                config.summary.top_n = top;
            }
            config.validate()?;

            let options = ImportOptions {
                worker,
                json,
                csv,
                save: save.then_some(data_dir),
                quiet,
            };
            cmd_import(&path, &config, options)
        }
        Commands::Records { path } => cmd_records(&path, &config),
        Commands::Ecg { path } => cmd_ecg(&path),
        Commands::Route { path } => cmd_route(&path),
        Commands::Config { .. } => Ok(()),
    }
}

struct ImportOptions {
    worker: bool,
    json: Option<PathBuf>,
    csv: Option<PathBuf>,
    save: Option<PathBuf>,
    quiet: bool,
}

fn cmd_import(path: &Path, config: &Config, options: ImportOptions) -> Result<()> {
    let quiet = options.quiet;
    let progress = |event: &ProgressEvent| {
        if !quiet {
            eprintln!("{}", event);
        }
    };

    let execution = if options.worker {
        Execution::Worker
    } else {
        Execution::Inline
    };
    tracing::debug!("Importing {:?} with {:?} execution", path, execution);
    let import = import_path_on(path, config, execution, progress)?;

    display_import(&import);

    if let Some(json_path) = &options.json {
        vitals_core::export::write_json(&import, json_path)?;
        println!("\n✓ JSON written to {}", json_path.display());
    }
    if let Some(csv_path) = &options.csv {
        vitals_core::export::write_metrics_csv(&import.summary, csv_path)?;
        println!("✓ CSV written to {}", csv_path.display());
    }
    if let Some(data_dir) = &options.save {
        let (json_path, csv_path) =
            vitals_core::export::save_to_data_dir(&import.summary, data_dir)?;
        println!("✓ Saved {} and {}", json_path.display(), csv_path.display());
    }

    Ok(())
}

fn display_import(import: &ExportImport) {
    let summary = &import.summary;
    let stats = &summary.summary;

    println!("\n╭─────────────────────────────────────────╮");
    println!("│  HEALTH EXPORT SUMMARY");
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Records:      {}", summary.total_records);
    println!("  Workouts:     {}", summary.total_workouts);
    println!("  Metric types: {}", stats.metrics_available.len());
    if let (Some(first), Some(last)) = (summary.all_dates.first(), summary.all_dates.last()) {
        println!(
            "  Days:         {} ({} to {})",
            summary.all_dates.len(),
            first,
            last
        );
    }

    if !stats.top_metrics.is_empty() {
        println!();
        println!("  Top metrics:");
        for metric in &stats.top_metrics {
            println!(
                "  → {:<48} {:>8}  avg {:.1}  min {}  max {} {}",
                metric.metric_type,
                metric.count,
                metric.average,
                metric.min,
                metric.max,
                metric.unit.as_deref().unwrap_or("")
            );
        }
    }

    println!();
    if let Some(hr) = &stats.heart_rate {
        println!(
            "  Heart rate:   avg {:.1} (min {}, max {}, {} readings)",
            hr.average, hr.min, hr.max, hr.count
        );
    }
    if let Some(steps) = &stats.steps {
        println!("  Steps:        {} total, {} average", steps.total, steps.average);
    }
    if let Some(calories) = &stats.calories {
        println!("  Calories:     {} total", calories.total);
    }

    if !import.waveforms.is_empty() || !import.routes.is_empty() {
        let points: usize = import.routes.iter().map(|r| r.points.len()).sum();
        println!("  Waveforms:    {}", import.waveforms.len());
        println!("  Routes:       {} ({} points)", import.routes.len(), points);
    }

    if summary.source.truncated {
        println!();
        println!(
            "  ℹ Only the first {:.1}MB of {:.1}MB were analyzed (truncated sample)",
            megabytes(summary.source.bytes_processed),
            megabytes(summary.source.original_size)
        );
    }
}

fn cmd_records(path: &Path, config: &Config) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let parsed = parse_document(&text, config);
    if parsed.records.is_empty() && parsed.workouts.is_empty() {
        return Err(Error::NoUsableData);
    }

    for record in &parsed.records {
        let value = match &record.value {
            RecordValue::Number(n) => n.to_string(),
            RecordValue::Text(t) => t.clone(),
        };
        println!(
            "{}  {}  {} {}  [{}]",
            record.date_key,
            record.record_type,
            value,
            record.unit.as_deref().unwrap_or(""),
            record.source
        );
    }
    for workout in &parsed.workouts {
        println!(
            "{}  {}  {:.1} min  {} energy  {} distance",
            workout.date_key,
            workout.activity_type,
            workout.duration_minutes,
            workout.total_energy,
            workout.total_distance
        );
    }

    println!();
    println!(
        "{} records, {} workouts",
        parsed.summary.total_records, parsed.summary.total_workouts
    );
    Ok(())
}

fn cmd_ecg(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let Some(recording) = extract_waveform(&text) else {
        println!("No waveform data found in {}", path.display());
        return Ok(());
    };

    println!(
        "Recorded:       {}",
        recording.timestamp.as_deref().unwrap_or("unknown")
    );
    if let Some(hr) = recording.heart_rate {
        println!("Heart rate:     {}", hr);
    }
    println!(
        "Classification: {}",
        recording.classification.as_deref().unwrap_or("none")
    );
    if let Some(rate) = recording.sample_rate {
        println!("Sample rate:    {} Hz", rate);
    }
    println!("Samples:        {}", recording.samples.len());
    Ok(())
}

fn cmd_route(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let points = extract_track_points(&text);
    let positioned = points.iter().filter(|p| p.has_position()).count();

    println!("Track points: {} ({} with a position)", points.len(), positioned);

    let elevations: Vec<f64> = points.iter().filter_map(|p| p.elevation).collect();
    if !elevations.is_empty() {
        let min = elevations.iter().copied().fold(f64::INFINITY, f64::min);
        let max = elevations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("Elevation:    {} to {} m", min, max);
    }

    let times: Vec<_> = points.iter().filter_map(|p| p.time).collect();
    if let (Some(start), Some(end)) = (times.iter().min(), times.iter().max()) {
        println!(
            "Duration:     {} min ({} to {})",
            (*end - *start).num_minutes(),
            start.to_rfc3339(),
            end.to_rfc3339()
        );
    }
    Ok(())
}

fn cmd_config(path: &Path, init: bool) -> Result<()> {
    if init {
        if path.exists() {
            return Err(Error::Config(format!(
                "{} already exists",
                path.display()
            )));
        }
        Config::default().save_to(path)?;
        println!("✓ Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = if path.exists() {
        Config::load_from(path)?
    } else {
        Config::default()
    };
    println!("# {}", path.display());
    print!("{}", config.to_toml()?);
    Ok(())
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
