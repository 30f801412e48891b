//! Logging setup for the bridge.
//!
//! Structured logging via `tracing`, configured with a small builder and
//! initialized once per process. Hosts embedding the cdylib go through
//! `genbridge_init_logging`; Rust hosts call [`init_logging`] directly.

use std::path::Path;

use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for development.
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON for log aggregation.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rotated file.
    File { directory: String, prefix: String },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    pub span_events: bool,
    /// Extra filter directives, e.g. "genbridge=trace".
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Initialize the global subscriber.
///
/// The returned guard must be kept alive for the duration of the program
/// so buffered log lines are flushed on exit.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config);

    let (writer, guard) = match &config.output {
        LogOutput::Stdout => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (w, Some(g))
        }
        LogOutput::Stderr => {
            let (w, g) = tracing_appender::non_blocking(std::io::stderr());
            (w, Some(g))
        }
        LogOutput::File { directory, prefix } => {
            let appender = rolling::daily(directory, prefix);
            let (w, g) = tracing_appender::non_blocking(appender);
            (w, Some(g))
        }
    };

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = fmt::layer().with_writer(writer).with_span_events(span_events);

    match config.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(base.pretty().with_filter(filter))
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(base.compact().with_filter(filter))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(base.json().with_filter(filter))
                .init();
        }
    }
    guard
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::from_default_env().add_directive(config.level.into());
    match &config.filter {
        Some(directives) => directives.split(',').fold(base, |filter, directive| {
            match directive.parse() {
                Ok(parsed) => filter.add_directive(parsed),
                Err(_) => {
                    eprintln!("genbridge: ignoring invalid log directive '{}'", directive);
                    filter
                }
            }
        }),
        None => base,
    }
}

/// Development defaults: debug-level, pretty, stderr.
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(
        LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Pretty)
            .with_filter("genbridge=debug"),
    )
}

/// Production defaults: info-level JSON into a rotated file.
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(
        LogConfig::new()
            .with_format(LogFormat::Json)
            .with_output(LogOutput::File {
                directory: log_dir.as_ref().to_string_lossy().to_string(),
                prefix: "genbridge".to_string(),
            })
            .with_filter("genbridge=info"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_applies_fields() {
        let config = LogConfig::new()
            .with_level(Level::TRACE)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_filter("genbridge=trace");

        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter.as_deref(), Some("genbridge=trace"));
    }
}
