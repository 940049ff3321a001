use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use fuel_events::{
    detect_request, DetectDiagnostics, DetectParams, DetectRequest, FuelEvent, RunSummary,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Refuel and drain detection CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect refuel/drain events in one or more JSON request files
    Detect(DetectArgs),
    /// Print the effective detection parameters and their hash
    Params(ParamsArgs),
}

#[derive(Args, Debug, Clone)]
struct TuningArgs {
    /// Refuel rate threshold (liters/minute)
    #[arg(long, default_value_t = 2.5)]
    refuel_rate_min: f64,

    /// Drain rate threshold (liters/minute)
    #[arg(long, default_value_t = 2.0)]
    drain_rate_min: f64,

    /// Maximum plausible absolute rate (liters/minute)
    #[arg(long, default_value_t = 12.0)]
    max_rate_plausible: f64,

    /// Minimum event duration (minutes)
    #[arg(long, default_value_t = 3.0)]
    min_event_min: f64,

    /// Default tank capacity (liters) when a request carries none
    #[arg(long, default_value_t = 300.0)]
    tank_capacity: f64,

    /// Savitzky-Golay window length (odd)
    #[arg(long, default_value_t = 9)]
    savgol_window: usize,

    /// Savitzky-Golay polynomial order
    #[arg(long, default_value_t = 2)]
    savgol_polyorder: usize,

    /// Merge tolerance between same-type events (minutes)
    #[arg(long, default_value_t = 3.0)]
    merge_gap: f64,
}

impl From<&TuningArgs> for DetectParams {
    fn from(args: &TuningArgs) -> Self {
        DetectParams {
            refuel_rate_min: args.refuel_rate_min,
            drain_rate_min: args.drain_rate_min,
            max_rate_plausible: args.max_rate_plausible,
            min_event_min: args.min_event_min,
            tank_capacity_l: args.tank_capacity,
            savgol_window: args.savgol_window,
            savgol_polyorder: args.savgol_polyorder,
            merge_gap_min: args.merge_gap,
        }
    }
}

#[derive(Parser, Debug)]
struct DetectArgs {
    /// JSON request files (`{"device_id", "tank_capacity_l", "points"}`)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    #[command(flatten)]
    tuning: TuningArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ParamsArgs {
    #[command(flatten)]
    tuning: TuningArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Debug, Serialize)]
struct FileReport {
    source: String,
    device_id: String,
    params_hash: String,
    diagnostics: DetectDiagnostics,
    events: Vec<FuelEvent>,
    summary: RunSummary,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Detect(args) => args.verbose,
        Command::Params(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Detect(args) => handle_detect(args),
        Command::Params(args) => handle_params(args),
    }
}

fn handle_detect(args: DetectArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    let params = DetectParams::from(&args.tuning);
    params.validate()?;
    let params_hash = params.params_hash_sha256()?;

    let started = Instant::now();
    let reports: Vec<FileReport> = args
        .inputs
        .par_iter()
        .map(|path| process_file(path, &params, &params_hash))
        .collect::<Result<_>>()?;
    debug!(
        files = reports.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "detection complete"
    );

    for report in &reports {
        info!(
            "{}: {} refuel(s), {} drain(s), net {:.2} L",
            report.device_id,
            report.summary.refuels,
            report.summary.drains,
            report.summary.net_change_l
        );
    }

    let to_stdout = args.output.as_os_str() == "-";
    let written = match (args.format, to_stdout) {
        (OutputFormat::Json, true) => write_json(&reports, io::stdout().lock()),
        (OutputFormat::Json, false) => {
            let file = File::create(&args.output)
                .with_context(|| format!("failed to create {}", args.output.display()))?;
            write_json(&reports, file)
        }
        (OutputFormat::Csv, true) => {
            let mut writer = csv::Writer::from_writer(io::stdout().lock());
            write_event_rows(&reports, &mut writer)
        }
        (OutputFormat::Csv, false) => {
            let file = File::create(&args.output)
                .with_context(|| format!("failed to create {}", args.output.display()))?;
            let mut writer = csv::Writer::from_writer(file);
            write_event_rows(&reports, &mut writer)
        }
    };
    written?;

    if !to_stdout {
        info!("Report written: {}", args.output.display());
    }
    Ok(())
}

fn process_file(path: &Path, params: &DetectParams, params_hash: &str) -> Result<FileReport> {
    let request = load_request(path)?;
    if request.points.is_empty() {
        warn!("{} has no points", path.display());
    }
    let outcome = detect_request(&request, params)
        .with_context(|| format!("detection failed for {}", path.display()))?;
    Ok(FileReport {
        source: path.display().to_string(),
        device_id: request.device_id,
        params_hash: params_hash.to_string(),
        diagnostics: outcome.diagnostics,
        events: outcome.report.events,
        summary: outcome.report.summary,
    })
}

fn load_request(path: &Path) -> Result<DetectRequest> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid detection request", path.display()))
}

fn handle_params(args: ParamsArgs) -> Result<()> {
    let params = DetectParams::from(&args.tuning);
    params.validate()?;
    let out = serde_json::json!({
        "params": params.params_json(),
        "params_hash": params.params_hash_sha256()?,
    });
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, &out)?;
    writeln!(handle)?;
    Ok(())
}

fn write_json<W: Write>(reports: &[FileReport], mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, reports)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn write_event_rows<W: Write>(reports: &[FileReport], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "source",
        "device_id",
        "type",
        "start_ts",
        "end_ts",
        "duration_min",
        "delta_liters",
        "confidence",
    ])?;

    for report in reports {
        for event in &report.events {
            writer.write_record([
                report.source.clone(),
                report.device_id.clone(),
                event.event_type.as_str().to_string(),
                event.start_ts.to_rfc3339(),
                event.end_ts.to_rfc3339(),
                format!("{:.3}", event.duration_min),
                format!("{:.3}", event.delta_liters),
                format!("{:.2}", event.confidence),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuel_events::{detect_events, InputPoint};

    fn ramp_report() -> FileReport {
        let points: Vec<InputPoint> = (0..=10)
            .map(|i| InputPoint {
                ts: Some(format!("2024-04-10T09:{:02}:00Z", i)),
                fuel: Some(50.0 + 10.0 * i as f64),
                ..InputPoint::default()
            })
            .collect();
        let outcome = detect_events(&points, &DetectParams::default(), None).unwrap();
        FileReport {
            source: "ramp.json".into(),
            device_id: "loader-3".into(),
            params_hash: DetectParams::default().params_hash_sha256().unwrap(),
            diagnostics: outcome.diagnostics,
            events: outcome.report.events,
            summary: outcome.report.summary,
        }
    }

    #[test]
    fn default_flags_match_library_defaults() {
        let cli = Cli::try_parse_from(["fuel-events", "params"]).unwrap();
        let Command::Params(args) = cli.command else {
            panic!("expected params subcommand");
        };
        assert_eq!(DetectParams::from(&args.tuning), DetectParams::default());
    }

    #[test]
    fn tuning_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "fuel-events",
            "detect",
            "a.json",
            "--refuel-rate-min",
            "4",
            "--savgol-window",
            "7",
            "--format",
            "csv",
        ])
        .unwrap();
        let Command::Detect(args) = cli.command else {
            panic!("expected detect subcommand");
        };
        let params = DetectParams::from(&args.tuning);
        assert_eq!(params.refuel_rate_min, 4.0);
        assert_eq!(params.savgol_window, 7);
        assert_eq!(args.format, OutputFormat::Csv);
        assert_eq!(args.output, PathBuf::from("-"));
    }

    #[test]
    fn csv_has_one_row_per_event() {
        let reports = vec![ramp_report()];
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_event_rows(&reports, &mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("source,device_id,type"));
        assert!(lines[1].starts_with("ramp.json,loader-3,refuel,2024-04-10T09:00:00+00:00"));
    }

    #[test]
    fn json_report_carries_hash_and_summary() {
        let mut out = Vec::new();
        write_json(&[ramp_report()], &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["device_id"], "loader-3");
        assert_eq!(value[0]["summary"]["refuels"], 1);
        assert_eq!(value[0]["params_hash"].as_str().unwrap().len(), 64);
        assert_eq!(value[0]["diagnostics"]["smoothing"], "savitzky_golay");
    }
}
