//! Logging setup for Stayforge services.
//!
//! Logging is configured through an explicitly constructed [`LogConfig`]
//! value that the host process builds once and hands to [`LogConfig::init`].
//! Nothing in this crate keeps its own global state; the only process-wide
//! effect is installing the `tracing` subscriber.
//!
//! # Examples
//!
//! ```no_run
//! use stayforge_log::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = LogConfig::new()
//!         .level(LogLevel::Debug)
//!         .format(LogFormat::Compact)
//!         .output(LogOutput::Stderr)
//!         .init();
//!
//!     info!("webhook subsystem starting");
//! }
//! ```
//!
//! ## Environment
//!
//! [`LogConfig::from_env`] reads `<PREFIX>_LOG_LEVEL`, `<PREFIX>_LOG_FORMAT`
//! and `<PREFIX>_LOG_OUTPUT` (`stdout`, `stderr` or a file path).

use std::io;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use tracing::{debug, error, info, trace, warn};

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Failed to open log file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),

    #[error("Unknown log {kind}: {value}")]
    Unknown { kind: &'static str, value: String },
}

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(LogError::Unknown {
                kind: "level",
                value: s.to_string(),
            }),
        }
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured, machine-readable (default)
    Json,
    Plain,
    /// Multi-line, for local development
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(LogError::Unknown {
                kind: "format",
                value: s.to_string(),
            }),
        }
    }
}

/// Output destination for logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Append to a single file
    File(String),
    /// Write to rotating log files
    RollingFile {
        directory: String,
        prefix: String,
        rotation: Rotation,
    },
}

impl LogOutput {
    /// Parse `stdout`, `stderr`, or treat anything else as a file path.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "stdout" | "" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            _ => LogOutput::File(value.trim().to_string()),
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
    Never,
}

impl Rotation {
    fn to_tracing_rotation(self) -> tracing_appender::rolling::Rotation {
        match self {
            Rotation::Minutely => tracing_appender::rolling::Rotation::MINUTELY,
            Rotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
            Rotation::Daily => tracing_appender::rolling::Rotation::DAILY,
            Rotation::Never => tracing_appender::rolling::Rotation::NEVER,
        }
    }
}

/// Logging configuration.
///
/// Built by the host process and passed to [`LogConfig::init`]; components
/// never read logging settings from anywhere else.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub timestamps: bool,
    pub thread_ids: bool,
    /// Include target (module path)
    pub targets: bool,
    pub file_line: bool,
    /// Emit span close events with timing
    pub spans: bool,
    /// ANSI colors; ignored for JSON
    pub colors: bool,
    /// Custom filter directive (overrides `level` if set)
    pub env_filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            timestamps: true,
            thread_ids: false,
            targets: true,
            file_line: false,
            spans: false,
            colors: false,
            env_filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `<PREFIX>_LOG_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env(prefix: &str) -> Result<Self, LogError> {
        let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).ok();
        let mut config = Self::default();

        if let Some(level) = var("LOG_LEVEL") {
            config.level = level.parse()?;
        }
        if let Some(format) = var("LOG_FORMAT") {
            config.format = format.parse()?;
        }
        if let Some(output) = var("LOG_OUTPUT") {
            config.output = LogOutput::parse(&output);
        }
        if let Some(filter) = var("LOG_FILTER") {
            config.env_filter = Some(filter);
        }

        Ok(config)
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_timestamps(mut self, enable: bool) -> Self {
        self.timestamps = enable;
        self
    }

    pub fn with_thread_ids(mut self, enable: bool) -> Self {
        self.thread_ids = enable;
        self
    }

    pub fn with_targets(mut self, enable: bool) -> Self {
        self.targets = enable;
        self
    }

    pub fn with_file_line(mut self, enable: bool) -> Self {
        self.file_line = enable;
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.spans = enable;
        self
    }

    pub fn with_colors(mut self, enable: bool) -> Self {
        self.colors = enable;
        self
    }

    /// Set a filter directive such as `"stayforge=debug,hyper=info"`.
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// The filter directive this configuration installs.
    pub fn filter_directive(&self) -> String {
        self.env_filter
            .clone()
            .unwrap_or_else(|| self.level.as_str().to_string())
    }

    /// Install the subscriber, logging the failure to stderr instead of
    /// returning it.
    ///
    /// The returned guard must be kept alive; dropping it flushes the
    /// non-blocking writer.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("stayforge-log: {}", e);
                None
            }
        }
    }

    /// Install the subscriber.
    pub fn try_init(self) -> Result<WorkerGuard, LogError> {
        let filter = EnvFilter::try_new(self.filter_directive())
            .map_err(|e| LogError::Filter(e.to_string()))?;

        let (writer, guard) = match &self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LogError::File {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            LogOutput::RollingFile {
                directory,
                prefix,
                rotation,
            } => tracing_appender::non_blocking(
                tracing_appender::rolling::RollingFileAppender::new(
                    rotation.to_tracing_rotation(),
                    directory,
                    prefix,
                ),
            ),
        };

        tracing_subscriber::registry()
            .with(self.fmt_layer(writer))
            .with(filter)
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        Ok(guard)
    }

    fn fmt_layer<W>(&self, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
    {
        let span_events = if self.spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let base = fmt::layer()
            .with_writer(writer)
            .with_target(self.targets)
            .with_thread_ids(self.thread_ids)
            .with_file(self.file_line)
            .with_line_number(self.file_line)
            .with_span_events(span_events);

        match (self.format, self.timestamps) {
            (LogFormat::Json, true) => base
                .json()
                .with_current_span(self.spans)
                .with_span_list(self.spans)
                .boxed(),
            (LogFormat::Json, false) => base
                .json()
                .with_current_span(self.spans)
                .with_span_list(self.spans)
                .without_time()
                .boxed(),
            (LogFormat::Plain, true) => base.with_ansi(self.colors).boxed(),
            (LogFormat::Plain, false) => base.with_ansi(self.colors).without_time().boxed(),
            (LogFormat::Pretty, true) => base.pretty().with_ansi(self.colors).boxed(),
            (LogFormat::Pretty, false) => {
                base.pretty().with_ansi(self.colors).without_time().boxed()
            }
            // Compact doesn't show file/line
            (LogFormat::Compact, true) => base
                .compact()
                .with_file(false)
                .with_line_number(false)
                .with_ansi(self.colors)
                .boxed(),
            (LogFormat::Compact, false) => base
                .compact()
                .with_file(false)
                .with_line_number(false)
                .with_ansi(self.colors)
                .without_time()
                .boxed(),
        }
    }
}
