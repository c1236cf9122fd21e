//! Structured logging for the SQLStep server
//!
//! - Human-readable console output for development
//! - JSON output with span context for production
//! - Daily rolling log files
//! - Per-request ids via the `request` span

use anyhow::Result;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE: &str = "sqlstep-server.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for production (structured logging)
    Json,
    /// Compact format for testing
    Compact,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl LogOutput {
    pub fn from_env() -> Self {
        match std::env::var("LOG_OUTPUT").as_deref() {
            Ok("file") => LogOutput::File,
            Ok("both") => LogOutput::Both,
            _ => LogOutput::Stdout,
        }
    }
}

fn log_dir() -> String {
    std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string())
}

fn file_appender() -> Result<RollingFileAppender> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE))
}

/// Initialize the global subscriber.
///
/// Environment variables:
/// - `RUST_LOG`: Log level (e.g., "debug", "info", "sqlstep_pipeline=debug")
/// - `LOG_FORMAT`: Output format ("pretty", "json", "compact")
/// - `LOG_OUTPUT`: Where to write logs ("stdout", "file", "both")
/// - `LOG_DIR`: Directory for log files (default: "./logs")
///
/// ```bash
/// # Every re-issued sub-query at debug level
/// RUST_LOG=sqlstep_pipeline=debug LOG_FORMAT=pretty cargo run -p sqlstep-server
///
/// # JSON to daily files
/// RUST_LOG=info LOG_FORMAT=json LOG_OUTPUT=file LOG_DIR=/var/log/sqlstep cargo run -p sqlstep-server
/// ```
pub fn init() -> Result<()> {
    let format = LogFormat::from_env();
    let output = LogOutput::from_env();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?
        .add_directive("hyper=warn".parse()?)
        .add_directive("tokio=warn".parse()?)
        .add_directive("runtime=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("h2=warn".parse()?);

    let stdout_layer = match format {
        LogFormat::Pretty => fmt::layer().pretty().with_thread_ids(true).with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    match output {
        LogOutput::Stdout => tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .try_init()?,
        LogOutput::File => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(file_appender()?).with_ansi(false))
            .try_init()?,
        LogOutput::Both => tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .with(fmt::layer().with_writer(file_appender()?).with_ansi(false))
            .try_init()?,
    }

    tracing::info!(format = ?format, output = ?output, "Logging initialized");
    if matches!(output, LogOutput::File | LogOutput::Both) {
        tracing::debug!(dir = %log_dir(), file = LOG_FILE, "Writing log files");
    }
    Ok(())
}

/// Emit a structured event with a fixed `event` name.
///
/// ```ignore
/// log_event!(
///     level: tracing::Level::INFO,
///     event: "query_replayed",
///     steps: 4,
///     rows: 14
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    (level: $level:expr, event: $event:expr $(, $key:ident: $value:expr)* $(,)?) => {
        tracing::event!(
            $level,
            event = $event
            $(, $key = ?$value)*
        );
    };
}
