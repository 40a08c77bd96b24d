use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use faceledger_core::capture::infrastructure::csv_ledger_store::CsvLedgerStore;
use faceledger_core::capture::infrastructure::directory_capture_sink::DirectoryCaptureSink;
use faceledger_core::identity::infrastructure::dbscan_cluster_engine::DbscanClusterEngine;
use faceledger_core::pipeline::infrastructure::jsonl_embedding_source::JsonlEmbeddingSource;
use faceledger_core::pipeline::ingest_use_case::IngestUseCase;
use faceledger_core::pipeline::recognition_session::{reset_storage, RecognitionSession};
use faceledger_core::pipeline::session_config::SessionConfig;
use faceledger_core::pipeline::session_logger::StdoutSessionLogger;
use faceledger_core::pipeline::visit_report_use_case::VisitReportUseCase;
use faceledger_core::shared::clock::SystemClock;
use faceledger_core::shared::constants::{
    COOLDOWN_PRESETS_SECONDS, LEDGER_FILE_NAME, OUTPUT_DIR_NAME,
};

/// Recurring-visitor tracking from face embeddings.
#[derive(Parser)]
#[command(name = "faceledger")]
struct Cli {
    /// Directory holding the visit log and saved crops.
    #[arg(long, global = true, default_value = OUTPUT_DIR_NAME)]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process face embeddings (JSON lines) and record visits.
    Ingest(IngestArgs),
    /// Show frequent customers: visit count, last visit and first saved crop.
    Report {
        /// Only list customers with at least this many visits.
        #[arg(long, default_value = "1")]
        min_visits: usize,
    },
    /// Copy the visit log to another file.
    Export {
        /// Destination CSV file.
        dest: PathBuf,
    },
    /// Delete all saved data: the visit log and every saved crop.
    Reset {
        /// Confirm deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// JSON lines file produced by the face extractor.
    input: PathBuf,

    /// Session config file (defaults to the per-user config, if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster distance threshold.
    #[arg(long)]
    eps: Option<f64>,

    /// Faces within eps (self included) needed to form a cluster.
    #[arg(long)]
    min_samples: Option<usize>,

    /// Faces accepted between two clustering passes.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds before the same customer is captured again (presets: 5, 10, 15, 30).
    #[arg(long)]
    cooldown: Option<f64>,

    /// Resize saved crops to SIZE x SIZE pixels.
    #[arg(long)]
    crop_size: Option<u32>,

    /// Write the effective settings back to the config file.
    #[arg(long)]
    save_config: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let ledger_path = cli.output_dir.join(LEDGER_FILE_NAME);

    match cli.command {
        Command::Ingest(args) => run_ingest(&args, &cli.output_dir, &ledger_path),
        Command::Report { min_visits } => run_report(&cli.output_dir, &ledger_path, min_visits),
        Command::Export { dest } => run_export(&cli.output_dir, &ledger_path, &dest),
        Command::Reset { yes } => run_reset(&cli.output_dir, &ledger_path, yes),
    }
}

fn run_ingest(
    args: &IngestArgs,
    output_dir: &Path,
    ledger_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    validate(args)?;
    let config = resolve_config(args)?;
    log::info!(
        "Session: eps {}, min samples {}, batch {}, cooldown {:.1}s",
        config.eps,
        config.min_samples,
        config.recluster_batch_size,
        config.cooldown_seconds
    );

    let session = Arc::new(open_session(config, output_dir, ledger_path, args.crop_size)?);
    let source = JsonlEmbeddingSource::open(&args.input)?;

    let progress: Box<dyn Fn(usize) -> bool + Send> = Box::new(|frames| {
        eprint!("\rProcessing frame {frames}");
        true
    });

    let mut use_case = IngestUseCase::new(
        session,
        Box::new(source),
        Box::new(SystemClock),
        Box::new(StdoutSessionLogger::default()),
        Some(progress),
        None,
    );
    let summary = use_case.execute()?;
    eprintln!();

    log::info!(
        "{} frames, {} faces ({} rejected), {} new customers, {} visits recorded",
        summary.frames,
        summary.observations,
        summary.rejected,
        summary.identities_created.len(),
        summary.captures
    );
    log::info!("Visit log: {}", ledger_path.display());
    Ok(())
}

fn run_report(
    output_dir: &Path,
    ledger_path: &Path,
    min_visits: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = VisitReportUseCase::new(ledger_path, DirectoryCaptureSink::new(output_dir));
    let entries: Vec<_> = report
        .build()?
        .into_iter()
        .filter(|e| e.visit_count >= min_visits)
        .collect();

    if entries.is_empty() {
        println!("No customers recorded yet.");
        return Ok(());
    }

    println!("{:>8}  {:>6}  {:<24}  Crop", "Customer", "Visits", "Last seen");
    for entry in entries {
        let crop = entry
            .thumbnail
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>8}  {:>6}  {:<24}  {crop}",
            entry.stable_id,
            entry.visit_count,
            entry.last_seen.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        );
    }
    Ok(())
}

fn run_export(
    output_dir: &Path,
    ledger_path: &Path,
    dest: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = VisitReportUseCase::new(ledger_path, DirectoryCaptureSink::new(output_dir));
    let bytes = report.export(dest)?;
    log::info!("Wrote {bytes} bytes to {}", dest.display());
    Ok(())
}

fn run_reset(
    output_dir: &Path,
    ledger_path: &Path,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !yes {
        return Err("Reset deletes the visit log and all saved crops; pass --yes to confirm".into());
    }
    // Works without loading the ledger, so an unreadable one can be cleared too.
    let mut store = CsvLedgerStore::open(ledger_path)?;
    reset_storage(&mut store, &DirectoryCaptureSink::new(output_dir))?;
    log::info!("All saved data in {} deleted", output_dir.display());
    Ok(())
}

fn open_session(
    config: SessionConfig,
    output_dir: &Path,
    ledger_path: &Path,
    crop_size: Option<u32>,
) -> Result<RecognitionSession<PathBuf>, Box<dyn std::error::Error>> {
    let sink = match crop_size {
        Some(size) => DirectoryCaptureSink::new(output_dir).with_size(size, size),
        None => DirectoryCaptureSink::new(output_dir),
    };
    let store = CsvLedgerStore::open(ledger_path)?;
    Ok(RecognitionSession::open(
        config,
        Box::new(DbscanClusterEngine::new()),
        Box::new(sink),
        Box::new(store),
    )?)
}

/// Config file (explicit, else per-user if present, else defaults), then
/// command-line overrides.
fn resolve_config(args: &IngestArgs) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let path = args.config.clone().or_else(SessionConfig::default_path);
    let mut config = match &path {
        Some(p) if p.exists() => SessionConfig::load(p)?,
        _ => SessionConfig::default(),
    };

    if let Some(eps) = args.eps {
        config.eps = eps;
    }
    if let Some(min_samples) = args.min_samples {
        config.min_samples = min_samples;
    }
    if let Some(batch_size) = args.batch_size {
        config.recluster_batch_size = batch_size;
    }
    if let Some(cooldown) = args.cooldown {
        config.cooldown_seconds = cooldown;
        if !COOLDOWN_PRESETS_SECONDS.iter().any(|&p| p as f64 == cooldown) {
            log::info!("Using custom cooldown of {cooldown}s");
        }
    }
    config.validate()?;

    if args.save_config {
        let p = path.ok_or("No config directory on this platform; pass --config")?;
        config.save(&p)?;
        log::info!("Saved settings to {}", p.display());
    }
    Ok(config)
}

fn validate(args: &IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.input.exists() {
        return Err(format!("Input file not found: {}", args.input.display()).into());
    }
    if let Some(path) = &args.config {
        if !path.exists() && !args.save_config {
            return Err(format!("Config file not found: {}", path.display()).into());
        }
    }
    if args.crop_size == Some(0) {
        return Err("Crop size must be a positive number of pixels".into());
    }
    Ok(())
}
