//! codice CLI: run the marker pipeline over image files and inspect profiles.

use clap::{Args, Parser, Subcommand};
use codice_cam::tuio::{RecordingServer, TuioCommand};
use codice_cam::{
    CodiceConfig, CodicePipeline, EventSummary, FrameDiagnostics, FrameSource, ImageSequence,
    PipelineStats, Profile,
};
use log::LevelFilter;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "codice")]
#[command(about = "Detect Codice fiducial markers and replay them as TUIO-style object sessions")]
#[command(version)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace). Overrides CODICE_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over images treated as consecutive frames.
    Detect(CliDetectArgs),

    /// Print a configuration profile as JSON.
    Config(CliConfigArgs),
}

#[derive(Debug, Clone, Args)]
struct CliDetectArgs {
    /// Input images, in frame order.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// JSON configuration file. Takes precedence over --profile.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named configuration profile.
    #[arg(long, default_value = "default")]
    profile: String,

    /// Spacing of the synthetic frame timestamps in ms. Defaults to the frame budget.
    #[arg(long)]
    frame_interval_ms: Option<u64>,

    /// Remove every tracked marker after the last frame.
    #[arg(long)]
    finish: bool,

    /// Path to write the JSON report. Printed to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliConfigArgs {
    /// Named configuration profile.
    #[arg(long, default_value = "default")]
    profile: String,

    /// List the profile names instead.
    #[arg(long)]
    list: bool,

    /// Path to write the configuration. Printed to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Serialize)]
struct FrameReport {
    path: PathBuf,
    timestamp_ms: u64,
    #[serde(flatten)]
    diagnostics: FrameDiagnostics,
}

#[derive(Serialize)]
struct FailedFrame {
    path: PathBuf,
    error: String,
}

#[derive(Serialize)]
struct DetectReport {
    endpoint: String,
    frames: Vec<FrameReport>,
    failed: Vec<FailedFrame>,
    final_events: Vec<EventSummary>,
    commands: Vec<TuioCommand>,
    stats: PipelineStats,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let log_level = cli
        .log_level
        .as_deref()
        .map(|s| {
            s.parse::<LevelFilter>()
                .map_err(|_| format!("invalid log level '{s}'"))
        })
        .transpose()?;

    match cli.command {
        Commands::Detect(args) => run_detect(&args, log_level),
        Commands::Config(args) => run_config(&args),
    }
}

fn init_logging(explicit: Option<LevelFilter>, debug_logging: bool) {
    let fallback = if debug_logging {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    #[cfg(feature = "tracing")]
    codice_cam::core::init_tracing(false, explicit, fallback);
    #[cfg(not(feature = "tracing"))]
    {
        let level = explicit.unwrap_or_else(|| codice_cam::core::level_from_env(fallback));
        if let Err(err) = codice_cam::core::init_with_level(level) {
            eprintln!("logger already installed: {err}");
        }
    }
}

fn load_config(args: &CliDetectArgs) -> CliResult<CodiceConfig> {
    match &args.config {
        Some(path) => Ok(CodiceConfig::load_json(path)?),
        None => Ok(CodiceConfig::for_profile(args.profile.parse::<Profile>()?)),
    }
}

fn write_output(out: Option<&Path>, json: &str) -> CliResult<()> {
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ── detect ─────────────────────────────────────────────────────────────

fn run_detect(args: &CliDetectArgs, log_level: Option<LevelFilter>) -> CliResult<()> {
    let cfg = load_config(args)?;
    init_logging(log_level, cfg.streaming.debug_logging);

    let interval = args
        .frame_interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| cfg.streaming.frame_budget());
    log::info!(
        "processing {} images, {} ms apart, endpoint {}",
        args.images.len(),
        interval.as_millis(),
        cfg.streaming.endpoint()
    );

    let mut pipeline = CodicePipeline::new(&cfg, RecordingServer::new())?;
    let mut source = ImageSequence::new(args.images.iter());
    let t0 = Instant::now();
    let mut frames = Vec::new();
    let mut failed = Vec::new();

    for (i, path) in args.images.iter().enumerate() {
        let elapsed = interval * i as u32;
        let loaded = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                log::warn!("{}: {err}", path.display());
                failed.push(FailedFrame {
                    path: path.clone(),
                    error: err.to_string(),
                });
                continue;
            }
        };

        match pipeline.process_frame(&loaded.as_frame(), t0 + elapsed) {
            Ok(diagnostics) => frames.push(FrameReport {
                path: path.clone(),
                timestamp_ms: elapsed.as_millis() as u64,
                diagnostics,
            }),
            Err(err) => {
                log::warn!("{}: {err}", path.display());
                failed.push(FailedFrame {
                    path: path.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    let final_events = if args.finish {
        let end = t0 + interval * args.images.len() as u32;
        pipeline.shutdown(end)?
    } else {
        Vec::new()
    };

    let stats = pipeline.stats();
    let commands = pipeline.into_server().take_commands();
    let report = DetectReport {
        endpoint: cfg.streaming.endpoint(),
        frames,
        failed,
        final_events,
        commands,
        stats,
    };

    write_output(args.out.as_deref(), &serde_json::to_string_pretty(&report)?)
}

// ── config ─────────────────────────────────────────────────────────────

fn run_config(args: &CliConfigArgs) -> CliResult<()> {
    if args.list {
        for profile in Profile::ALL {
            println!("{profile}");
        }
        return Ok(());
    }

    let cfg = CodiceConfig::for_profile(args.profile.parse::<Profile>()?);
    write_output(args.out.as_deref(), &cfg.to_json()?)
}
