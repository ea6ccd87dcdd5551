//! Process-wide logging setup shared by the detector, the TUIO bridge and the CLI.
//!
//! Library code only talks to the `log` facade. Binaries install either the
//! stderr logger here or, with the `tracing` feature, a `tracing-subscriber`
//! formatter that also captures `log` records.

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted by [`level_from_env`].
pub const LOG_ENV: &str = "CODICE_LOG";

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let target = record.target().split("::").next().unwrap_or("");
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            target,
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Only the first call installs a logger; later calls keep the original
/// level and return `Ok(())`.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Level named by `CODICE_LOG` (`error`..`trace`, `off`), or `fallback`.
pub fn level_from_env(fallback: LevelFilter) -> LevelFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(fallback)
}

/// Filter directive for [`init_tracing`]: `level` if given, else a valid
/// `RUST_LOG`, else `fallback`.
#[cfg(feature = "tracing")]
fn tracing_directive(level: Option<LevelFilter>, fallback: LevelFilter) -> String {
    let lower = |l: LevelFilter| l.to_string().to_ascii_lowercase();
    match level {
        Some(l) => lower(l),
        None => std::env::var(EnvFilter::DEFAULT_ENV)
            .ok()
            .filter(|v| EnvFilter::try_new(v).is_ok())
            .unwrap_or_else(|| lower(fallback)),
    }
}

/// Install a `tracing` subscriber.
///
/// An explicit `level` wins over `RUST_LOG`; `fallback` applies when neither
/// is set. `log` records from dependencies are forwarded through `tracing-log`
/// by the subscriber's default `log` compatibility layer.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, level: Option<LevelFilter>, fallback: LevelFilter) {
    let filter = EnvFilter::new(tracing_directive(level, fallback));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);
    let _ = if json {
        builder
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .finish()
            .try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
