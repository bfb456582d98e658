//! Logging setup for the Modbus tools
//!
//! Console output uses a bracketed level format:
//! `2026-10-16T08:12:03.417201Z [INFO] Connected to Modbus slave 10.0.0.5:502`.
//! An optional file layer writes the same format to a daily rolling file
//! through `tracing-appender`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{Error, Result};

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "\x1b[35m",
        Level::DEBUG => "\x1b[34m",
        Level::INFO => "\x1b[32m",
        Level::WARN => "\x1b[33m",
        Level::ERROR => "\x1b[31m",
    }
}

/// Event formatter: `timestamp [LEVEL] message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = event.metadata().level();
        if writer.has_ansi_escapes() {
            write!(writer, "{}{}\x1b[0m ", level_color(level), format_level(level))?;
        } else {
            write!(writer, "{} ", format_level(level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Keeps the non-blocking file writers flushing for the life of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Used as the log file prefix
    pub service_name: String,
    /// Directory for the daily log file; console only when `None`
    pub log_dir: Option<PathBuf>,
    pub console_level: Level,
    pub file_level: Level,
    /// JSON lines in the log file instead of the bracketed format
    pub enable_json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "modbus".to_string(),
            log_dir: None,
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            enable_json: false,
        }
    }
}

impl LogConfig {
    /// Filter applied when `RUST_LOG` is not set
    fn default_filter(&self) -> String {
        let level = if self.log_dir.is_some() {
            self.console_level.max(self.file_level)
        } else {
            self.console_level
        };
        level.as_str().to_lowercase()
    }

    /// Name prefix of the daily file
    pub fn file_prefix(&self) -> String {
        format!("{}.log", self.service_name)
    }
}

/// Daily rolling file layer; the guard must outlive the layer
fn file_layer<S>(
    dir: &Path,
    config: &LogConfig,
) -> Result<(Box<dyn Layer<S> + Send + Sync + 'static>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, config.file_prefix());
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_filter(LevelFilter::from_level(config.file_level))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .with_filter(LevelFilter::from_level(config.file_level))
            .boxed()
    };
    Ok((layer, guard))
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured levels. Fails if a global subscriber
/// is already installed.
pub fn init_with_config(config: LogConfig) -> Result<()> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(&directives)
            .map_err(|e| Error::Logging(format!("invalid RUST_LOG '{}': {}", directives, e)))?,
        Err(_) => EnvFilter::new(config.default_filter()),
    };

    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .with_filter(LevelFilter::from_level(config.console_level))
        .boxed();

    let file = match &config.log_dir {
        Some(dir) => {
            let (layer, guard) = file_layer(dir, &config)?;
            match GUARDS.get_or_init(|| Mutex::new(Vec::new())).lock() {
                Ok(mut guards) => guards.push(guard),
                Err(poisoned) => poisoned.into_inner().push(guard),
            }
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    match &config.log_dir {
        Some(dir) => tracing::debug!("Logging: {} @ {}", config.service_name, dir.display()),
        None => tracing::debug!("Logging: {} (console)", config.service_name),
    }
    Ok(())
}
