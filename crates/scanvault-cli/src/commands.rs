//! Subcommand bodies.
//!
//! Each command writes its human-facing output to the supplied writer so it
//! can be exercised in tests; `main` passes stdout.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::DateTime;
use colored::Colorize;
use scanvault_ingest::recorder::StatsReport;
use scanvault_ingest::{
    IngestError, IngestWorker, LineSource, Recorder, RecorderSummary, ScanSource, WebSocketSource,
    worker,
};
use scanvault_perception::PerceptionError;
use scanvault_perception::export::{PlyWriter, PointCloudWriter};
use scanvault_perception::pipeline::{Pipeline, PipelineConfig, PipelineResult, ScanAnalyzer};
use scanvault_perception::reconstruct::to_points;
use scanvault_store::{ScanStore, StoreError};
use scanvault_types::now_epoch_secs;
use thiserror::Error;
use tracing::info;

use crate::config::{self, Config};

/// Everything a subcommand can fail with.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Perception(#[from] PerceptionError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no database at {} (run `scanvault record` first)", .0.display())]
    MissingDatabase(PathBuf),
    #[error("{0}")]
    NotFound(String),
    #[error("integrity check failed: {0}")]
    Unhealthy(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Open a database that must already exist.
pub fn open_existing(path: &Path) -> Result<ScanStore> {
    if !path.exists() {
        return Err(CliError::MissingDatabase(path.to_path_buf()));
    }
    Ok(ScanStore::open(path)?)
}

/// `1700000000.25 (2023-11-14 22:13:20.250 UTC)`
fn format_ts(ts: f64) -> String {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9).round().min(999_999_999.0) as u32;
    match DateTime::from_timestamp(secs as i64, nanos) {
        Some(dt) => format!("{ts} ({})", dt.format("%Y-%m-%d %H:%M:%S%.3f UTC")),
        None => ts.to_string(),
    }
}

fn opt_ms(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |ms| format!("{ms:.2} ms"))
}

// ─────────────────────────────────────────────────────────────────────────────
// record
// ─────────────────────────────────────────────────────────────────────────────

/// Ingest until the source ends or `shutdown` is raised.
pub async fn record(
    cfg: &Config,
    db_path: &Path,
    from_stdin: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<RecorderSummary> {
    let policy = cfg.retry.policy();
    let store = ScanStore::open_with_retry(db_path, &policy)?;
    let mut recorder = Recorder::new(store, cfg.ingest.recorder.clone());

    let source: Box<dyn ScanSource> = if from_stdin {
        Box::new(LineSource::stdin(cfg.ingest.topic.clone()))
    } else {
        Box::new(WebSocketSource::new(
            cfg.ingest.source_url.clone(),
            cfg.ingest.topic.clone(),
            policy,
        ))
    };
    info!(
        source = %config::redact_url(&source.describe()),
        db = %db_path.display(),
        "recording"
    );

    let stream = tokio::select! {
        stream = source.messages() => stream?,
        _ = wait_for(shutdown.clone()) => {
            info!("shutdown requested before the source connected");
            return Ok(recorder.finish(now_epoch_secs()).map_err(IngestError::from)?);
        }
    };
    recorder.mark_stream_start(now_epoch_secs());

    let worker = IngestWorker::spawn(recorder, cfg.ingest.channel_capacity);
    let tx = worker.sender();
    let forwarded = worker::pump(stream, &tx, shutdown).await;
    drop(tx);
    let summary = worker.finish().await?;
    info!(forwarded, "recording stopped");
    Ok(summary)
}

async fn wait_for(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

pub fn print_recorder_summary(summary: &RecorderSummary, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}", "Recording summary".bold())?;
    writeln!(out, "  messages stored       {}", summary.messages)?;
    writeln!(out, "  decode failures       {}", summary.decode_failures)?;
    writeln!(out, "  persistence failures  {}", summary.persistence_failures)?;
    writeln!(out, "  commits               {}", summary.commits)?;
    writeln!(out, "  snapshots             {}", summary.snapshots)?;
    if let Some(report) = &summary.final_report {
        print_report(report, out)?;
    }
    Ok(())
}

fn print_report(report: &StatsReport, out: &mut dyn Write) -> Result<()> {
    let l = &report.latency;
    writeln!(
        out,
        "  latency               avg {:.2} / min {:.2} / max {:.2} / p95 {:.2} ms",
        l.avg, l.min, l.max, l.p95
    )?;
    writeln!(out, "  throughput            {:.2} msg/s", report.throughput)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// analyze / export
// ─────────────────────────────────────────────────────────────────────────────

/// Run the pipeline on the scan at `timestamp` (latest when `None`).
pub fn analyze(
    store: ScanStore,
    pipeline: &PipelineConfig,
    timestamp: Option<f64>,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let analyzer = ScanAnalyzer::new(store, Arc::new(Pipeline::from_config(pipeline)));
    let result = match timestamp {
        Some(ts) => analyzer.analyze_at(ts)?,
        None => analyzer.analyze_latest()?,
    }
    .ok_or_else(|| no_scan(timestamp))?;

    if json {
        serde_json::to_writer_pretty(&mut *out, &result)?;
        writeln!(out)?;
    } else {
        print_result(&result, out)?;
    }
    Ok(())
}

fn no_scan(timestamp: Option<f64>) -> CliError {
    match timestamp {
        Some(ts) => CliError::NotFound(format!("no scan with timestamp {ts}")),
        None => CliError::NotFound("the database holds no scans".to_string()),
    }
}

fn print_result(result: &PipelineResult, out: &mut dyn Write) -> Result<()> {
    let s = &result.summary;
    writeln!(
        out,
        "{} {} from {}",
        "Scan".bold(),
        format_ts(result.timestamp),
        result.device_id.cyan()
    )?;
    writeln!(out, "  original points  {}", s.original_points)?;
    writeln!(out, "  after filtering  {}", s.filtered_points)?;
    writeln!(out, "  ground points    {}", s.ground_points)?;
    writeln!(out, "  object points    {}", s.object_points)?;
    if let Some(p) = &result.ground_plane {
        writeln!(
            out,
            "  ground plane     {:.4}x + {:.4}y + {:.4}z + {:.4} = 0",
            p.a, p.b, p.c, p.d
        )?;
    }
    writeln!(out, "  clusters         {}", s.cluster_count)?;
    for c in &s.clusters {
        match &c.dimensions {
            Some(d) => writeln!(
                out,
                "    #{:<3} {:>5} pts  center ({:.1}, {:.1}, {:.1})  {:.1} x {:.1} x {:.1}",
                c.cluster_id,
                c.point_count,
                d.center.x,
                d.center.y,
                d.center.z,
                d.width,
                d.depth,
                d.height
            )?,
            None => writeln!(
                out,
                "    #{:<3} {:>5} pts  not measured: {}",
                c.cluster_id,
                c.point_count,
                c.error.as_deref().unwrap_or("unknown error")
            )?,
        }
    }
    Ok(())
}

/// Write the reconstructed cloud of one scan as ASCII PLY.
pub fn export(
    store: &ScanStore,
    timestamp: Option<f64>,
    output: &Path,
    out: &mut dyn Write,
) -> Result<()> {
    let scan = match timestamp {
        Some(ts) => store.scan_at(ts)?,
        None => store.latest_scan()?,
    }
    .ok_or_else(|| no_scan(timestamp))?;
    let cloud = to_points(&scan);
    PlyWriter.write_to_path(&cloud, output)?;
    writeln!(
        out,
        "{} {} points from scan {} to {}",
        "✓".green().bold(),
        cloud.len(),
        scan.timestamp,
        output.display()
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// scans / info
// ─────────────────────────────────────────────────────────────────────────────

pub fn scans(store: &ScanStore, limit: usize, out: &mut dyn Write) -> Result<()> {
    let timestamps = store.recent_timestamps(limit)?;
    if timestamps.is_empty() {
        writeln!(out, "No scans recorded.")?;
    }
    for ts in timestamps {
        writeln!(out, "{}", format_ts(ts))?;
    }
    Ok(())
}

pub fn info(store: &ScanStore, db_path: &Path, out: &mut dyn Write) -> Result<()> {
    let s = store.summary()?;
    writeln!(out, "{} {}", "Database".bold(), db_path.display())?;
    writeln!(out, "  messages      {}", s.message_count)?;
    writeln!(out, "  unique scans  {}", s.scan_count)?;
    writeln!(out, "  devices       {}", s.device_count)?;
    writeln!(out, "  readings      {}", s.reading_count)?;
    if let (Some(first), Some(last)) = (s.first_timestamp, s.last_timestamp) {
        writeln!(out, "  first scan    {}", format_ts(first))?;
        writeln!(out, "  last scan     {}", format_ts(last))?;
        writeln!(out, "  duration      {:.1} s", last - first)?;
    }
    writeln!(
        out,
        "  latency       avg {} / min {} / max {}",
        opt_ms(s.avg_latency_ms),
        opt_ms(s.min_latency_ms),
        opt_ms(s.max_latency_ms)
    )?;
    match store.latency_percentiles()? {
        Some(p) => writeln!(
            out,
            "  percentiles   p50 {:.2} ms / p95 {:.2} ms / p99 {:.2} ms",
            p.p50, p.p95, p.p99
        )?,
        None => writeln!(out, "  percentiles   -")?,
    }
    match store.latest_snapshot()? {
        Some(snap) => writeln!(
            out,
            "  last snapshot {} msgs, p95 {:.2} ms, {:.2} msg/s at {}",
            snap.message_count,
            snap.p95_latency,
            snap.throughput,
            format_ts(snap.timestamp)
        )?,
        None => writeln!(out, "  last snapshot -")?,
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// db
// ─────────────────────────────────────────────────────────────────────────────

pub fn db_check(store: &ScanStore, out: &mut dyn Write) -> Result<()> {
    let health = store.health()?;
    writeln!(out, "  integrity          {}", health.integrity)?;
    writeln!(out, "  size               {} bytes", health.size_bytes)?;
    writeln!(out, "  sensor_data        {} rows", health.sensor_data_rows)?;
    writeln!(out, "  sensor_readings    {} rows", health.sensor_readings_rows)?;
    writeln!(out, "  performance_stats  {} rows", health.performance_stats_rows)?;
    if !health.is_ok() {
        return Err(CliError::Unhealthy(health.integrity));
    }
    writeln!(out, "{} database is healthy", "✓".green().bold())?;
    Ok(())
}

pub fn db_vacuum(store: &mut ScanStore, out: &mut dyn Write) -> Result<()> {
    store.vacuum()?;
    writeln!(out, "{} vacuum complete", "✓".green().bold())?;
    Ok(())
}

pub fn db_optimize(store: &mut ScanStore, out: &mut dyn Write) -> Result<()> {
    store.optimize()?;
    writeln!(out, "{} statistics updated", "✓".green().bold())?;
    Ok(())
}

/// Delete scans older than `days` days before `now`.
pub fn db_prune(store: &mut ScanStore, days: u32, now: f64, out: &mut dyn Write) -> Result<()> {
    let cutoff = now - f64::from(days) * 86_400.0;
    let report = store.prune_older_than(cutoff)?;
    writeln!(
        out,
        "{} removed {} scans and {} readings older than {}",
        "✓".green().bold(),
        report.scans_removed,
        report.readings_removed,
        format_ts(cutoff)
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// config
// ─────────────────────────────────────────────────────────────────────────────

pub fn config_init(path: &Path, force: bool, out: &mut dyn Write) -> Result<()> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config::save_to(&Config::default(), path).map_err(CliError::Config)?;
    writeln!(
        out,
        "{} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    )?;
    Ok(())
}

pub fn config_show(cfg: &Config, path: &Path, out: &mut dyn Write) -> Result<()> {
    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, defaults)", path.display())
    };
    writeln!(out, "# {source}")?;
    let mut shown = cfg.clone();
    shown.ingest.source_url = config::redact_url(&shown.ingest.source_url);
    write!(out, "{}", config::to_toml(&shown).map_err(CliError::Config)?)?;
    Ok(())
}
