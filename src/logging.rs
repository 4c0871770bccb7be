//! Logging setup on tracing + tracing-subscriber
//!
//! One console layer (compact or JSON) and an optional rolling file layer.
//! `RUST_LOG` directives override the configured level for the targets
//! they name.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Dependencies clamped to `warn` regardless of the configured level.
const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "tower_http"];

const DEFAULT_LOG_PREFIX: &str = "personality-net";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the non-blocking file writer alive. Dropping it flushes.
pub struct LogGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber for a node process.
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);
    let filter = env_filter(level)?;

    let (file_layer, guard) = match settings.file.as_deref().filter(|f| !f.is_empty()) {
        Some(path) => {
            let (layer, guard) = file_layer(Path::new(path), settings)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(settings.json_format))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(
        level = %level,
        file = ?settings.file,
        json = settings.json_format,
        "Logging initialized"
    );

    Ok(LogGuards { _file: guard })
}

/// Minimal console logging for short-lived commands.
pub fn init_simple(level: Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))
}

// ─────────────────────────────────────────────────────────────────
// Levels and Filters
// ─────────────────────────────────────────────────────────────────

/// `-q` beats `-v`, and `-v` beats the configured level.
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => level_from_str(&settings.level),
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Unknown names fall back to `info`.
fn level_from_str(name: &str) -> Level {
    let name = name.trim().to_ascii_lowercase();
    if name == "warning" {
        return Level::WARN;
    }
    Level::from_str(&name).unwrap_or(Level::INFO)
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let level = level.as_str().to_ascii_lowercase();

    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&level))
        .add_directive(directive(&format!("personality_net={}", level))?);

    for target in NOISY_TARGETS {
        filter = filter.add_directive(directive(&format!("{}=warn", target))?);
    }
    Ok(filter)
}

fn directive(raw: &str) -> Result<Directive> {
    raw.parse()
        .map_err(|e| Error::config_field_invalid("logging.level", format!("'{}': {}", raw, e)))
}

// ─────────────────────────────────────────────────────────────────
// Layers
// ─────────────────────────────────────────────────────────────────

fn console_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
    }
}

fn file_layer<S>(path: &Path, settings: &LoggingSettings) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let (dir, prefix) = split_log_path(path);
    fs::create_dir_all(&dir).map_err(|e| Error::IoWrite {
        path: dir.clone(),
        source: e,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(rotation_for(settings.max_file_size_mb))
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(settings.max_files.max(1) as usize)
        .build(&dir)
        .map_err(|e| Error::Internal(format!("Failed to create log file appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if settings.json_format {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };
    Ok((layer, guard))
}

/// tracing-appender rotates by time only. Small size caps rotate hourly.
fn rotation_for(max_file_size_mb: u64) -> Rotation {
    if (1..10).contains(&max_file_size_mb) {
        Rotation::HOURLY
    } else {
        Rotation::DAILY
    }
}

/// Directory and file-name prefix for the rolling appender.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_PREFIX)
        .to_string();
    (dir, prefix)
}
