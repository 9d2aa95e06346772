use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_core::{
    AttendanceLedger, AttendanceService, AttemptReport, Capture, CaptureImage, Gallery, MatchOutcome,
    MatchTarget, Outcome, Resolution, ResolutionSource, WindowRule,
};
use rollcall_store::SqliteLedger;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod audit;
mod config;
mod engine;
mod matcher;

use config::Config;
use engine::EngineHandle;

/// Exit status for attempts refused by the gate (no ledger change).
const EXIT_DENIED: u8 = 2;
/// Exit status when the ledger could not be read or written.
const EXIT_LEDGER_FAILURE: u8 = 1;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance register", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark today's attendance from a face photo, a typed name, or both
    Mark {
        /// Photo of the person's face
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Name to use if face recognition fails
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List attendance records
    Report {
        /// Only records for this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Export the ledger as an identity/timestamp table
    Export {
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List registered identities and their reference samples
    Gallery,
    /// Show configuration and ledger status
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(source = ?config.source, db = %config.db_path.display(), "configuration loaded");

    match cli.command {
        Commands::Mark { image, name } => mark(&config, image, name).await.map(ExitCode::from),
        Commands::Report { date } => report(&config, date).map(|()| ExitCode::SUCCESS),
        Commands::Export { format, out } => export(&config, format, out).map(|()| ExitCode::SUCCESS),
        Commands::Gallery => list_gallery(&config).map(|()| ExitCode::SUCCESS),
        Commands::Status => status(&config).map(|()| ExitCode::SUCCESS),
    }
}

fn load_gallery(config: &Config) -> Result<Gallery> {
    Gallery::load(&config.gallery_dir, &config.roster)
        .with_context(|| format!("failed to load gallery {}", config.gallery_dir.display()))
}

fn open_ledger(config: &Config) -> Result<SqliteLedger> {
    SqliteLedger::open(&config.db_path)
        .with_context(|| format!("failed to open attendance ledger {}", config.db_path.display()))
}

/// How a `mark` attempt ended, as seen by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptStatus {
    Authorized,
    Denied,
    LedgerFailure,
}

impl AttemptStatus {
    fn code(self) -> u8 {
        match self {
            Self::Authorized => 0,
            Self::Denied => EXIT_DENIED,
            Self::LedgerFailure => EXIT_LEDGER_FAILURE,
        }
    }
}

impl From<AttemptStatus> for ExitCode {
    fn from(status: AttemptStatus) -> Self {
        ExitCode::from(status.code())
    }
}

async fn mark(config: &Config, image: Option<PathBuf>, name: Option<String>) -> Result<AttemptStatus> {
    let gallery = Arc::new(load_gallery(config)?);
    let ledger = match open_ledger(config) {
        Ok(ledger) => ledger,
        Err(e) => {
            tracing::error!(error = %e, "attendance ledger unavailable");
            eprintln!("Attendance could not be recorded: {e:#}");
            return Ok(AttemptStatus::LedgerFailure);
        }
    };
    let service = AttendanceService::new(gallery, config.window.clone(), ledger);
    let engine = engine::spawn_engine(matcher::from_command(&config.matcher_command))
        .context("failed to start matcher thread")?;

    let staged = image.as_deref().map(stage_capture).transpose()?;
    // Owns the staged image; every return below releases it.
    let capture = Capture::new(staged, name);

    let span = tracing::info_span!("attempt", id = %Uuid::new_v4());
    attempt(
        config,
        &service,
        &engine,
        capture,
        tokio::signal::ctrl_c(),
        &mut std::io::stdout().lock(),
    )
    .instrument(span)
    .await
}

/// Run one attempt. Resolving `cancel` while the matcher is busy abandons
/// the attempt; the capture is released on every path.
async fn attempt<L, C>(
    config: &Config,
    service: &AttendanceService<L>,
    engine: &EngineHandle,
    capture: Capture,
    cancel: C,
    out: &mut impl Write,
) -> Result<AttemptStatus>
where
    L: AttendanceLedger,
    C: Future,
{
    let matched = match service.match_target(&capture) {
        MatchTarget::Skip(outcome) => outcome,
        MatchTarget::Run { image, gallery_dir } => {
            let find = engine.find(image.to_path_buf(), gallery_dir.to_path_buf());
            tokio::select! {
                result = find => {
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "face matcher failed; falling back to typed name");
                    }
                    MatchOutcome::from_result(result)
                }
                _ = cancel => {
                    tracing::warn!("attempt cancelled during face matching");
                    anyhow::bail!("attendance attempt cancelled");
                }
            }
        }
    };

    let now = config.now();
    let report = match service.conclude(&capture, matched, now) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Attendance could not be recorded: {e}");
            return Ok(AttemptStatus::LedgerFailure);
        }
    };

    print_resolution(&report.resolution, out)?;
    writeln!(out, "{}", report.outcome)?;
    if report.outcome == Outcome::OutsideWindow {
        writeln!(out, "Attendance window: {}", config.window)?;
    }

    if report.outcome.is_authorized() {
        archive_capture(config, &capture, &report, now, out)?;
        Ok(AttemptStatus::Authorized)
    } else {
        Ok(AttemptStatus::Denied)
    }
}

/// Copy the user's photo into a scratch file owned by this attempt.
fn stage_capture(path: &Path) -> Result<CaptureImage> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_else(|| ".jpg".to_string());
    CaptureImage::stage(&bytes, &std::env::temp_dir(), &suffix).context("failed to stage capture")
}

fn print_resolution(resolution: &Resolution, out: &mut impl Write) -> std::io::Result<()> {
    for signal in &resolution.signals {
        writeln!(out, "{signal}")?;
    }
    if let (Some(identity), Some(ResolutionSource::FaceMatch)) = (&resolution.identity, resolution.source) {
        writeln!(out, "Recognized as: {identity}")?;
        if let Some(distance) = resolution.distance {
            writeln!(out, "Match distance (lower is better): {distance:.4}")?;
        }
    }
    Ok(())
}

fn archive_capture(
    config: &Config,
    capture: &Capture,
    report: &AttemptReport,
    now: NaiveDateTime,
    out: &mut impl Write,
) -> std::io::Result<()> {
    let (Some(dir), Some(image), Some(identity)) =
        (&config.audit_dir, capture.image(), report.resolution.identity.as_ref())
    else {
        return Ok(());
    };
    match audit::archive(image.path(), dir, identity, now) {
        Ok(dest) => writeln!(out, "Saved face image as: {}", dest.display())?,
        Err(e) => {
            tracing::warn!(error = %e, "could not save audit photo");
            eprintln!("Could not save face image: {e:#}");
        }
    }
    Ok(())
}

fn report(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let ledger = open_ledger(config)?;
    let records = match date {
        Some(day) => ledger.read_day(day)?,
        None => ledger.read()?,
    };

    if records.is_empty() {
        println!("No attendance records.");
        return Ok(());
    }
    for record in &records {
        println!("{:<24} {}", record.identity, record.timestamp_string());
    }
    println!("{} record(s)", records.len());
    Ok(())
}

fn export(config: &Config, format: ExportFormat, out: Option<PathBuf>) -> Result<()> {
    let records = open_ledger(config)?.read()?;

    let write = |w: &mut dyn Write| match format {
        ExportFormat::Csv => rollcall_store::write_csv(&records, w),
        ExportFormat::Json => rollcall_store::write_json(&records, w),
    };

    match out {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write(&mut std::io::BufWriter::new(file))
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), records = records.len(), "ledger exported");
        }
        None => write(&mut std::io::stdout().lock()).context("failed to write export")?,
    }
    Ok(())
}

fn list_gallery(config: &Config) -> Result<()> {
    let gallery = load_gallery(config)?;
    println!("Gallery: {}", config.gallery_dir.display());
    if gallery.is_empty() {
        println!("  no registered identities");
    }
    for identity in gallery.identities() {
        match gallery.samples(identity.as_str()).len() {
            0 => println!("  {identity:<24} (no samples)"),
            n => println!("  {identity:<24} {n} sample(s)"),
        }
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let gallery = load_gallery(config)?;
    let ledger = open_ledger(config)?;
    let now = config.now();
    let matcher = (!config.matcher_command.is_empty()).then(|| config.matcher_command.join(" "));

    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "config": config.source.as_ref().map(|p| p.display().to_string()),
        "gallery_dir": config.gallery_dir.display().to_string(),
        "identities": gallery.len(),
        "ledger": config.db_path.display().to_string(),
        "records": ledger.count()?,
        "records_today": ledger.read_day(now.date())?.len(),
        "matcher": matcher,
        "day_clock": config.day_clock,
        "attendance_window": config.window,
        "window_open_now": config.window.permits(now),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
