//! Logging setup shared by the Postdeck binaries
//!
//! Output always goes to stderr so stdout stays clean for piping
//! (`deck-queue list --format json | jq`).
//!
//! ```no_run
//! use libpostdeck::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "debug".to_string(), false).init();
//!
//! // Or honour POSTDECK_LOG_FORMAT / POSTDECK_LOG_LEVEL
//! libpostdeck::logging::init_from_env("info", false);
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// sqlx logs every statement at info; keep it quiet unless asked for.
const QUIET_DEPENDENCIES: &str = "sqlx=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text without colors
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line colored output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `verbose` forces debug level regardless of `level`.
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Directive string used when `RUST_LOG` is not set
    pub fn directives(&self) -> String {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        format!("{},{}", level, QUIET_DEPENDENCIES)
    }

    /// Install the global subscriber
    ///
    /// A second call is ignored, which keeps tests that share a process from
    /// panicking.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.directives()));

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .try_init(),
        };

        if result.is_err() {
            tracing::debug!("Logging already initialized");
        }
    }
}

/// Initialize logging from `POSTDECK_LOG_FORMAT` and `POSTDECK_LOG_LEVEL`
///
/// Falls back to text output at `default_level`. Daemons pass `info`;
/// interactive tools pass `warn` so stderr stays quiet.
pub fn init_from_env(default_level: &str, verbose: bool) {
    let format = std::env::var("POSTDECK_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text);

    let level = std::env::var("POSTDECK_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());

    LoggingConfig::new(format, level, verbose).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert!(err.contains("Invalid log format: 'yaml'"));
    }

    #[test]
    fn test_log_format_display_round_trips() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_directives_quiet_sqlx() {
        let config = LoggingConfig::new(LogFormat::Text, "warn".to_string(), false);
        assert_eq!(config.directives(), "warn,sqlx=warn");
    }

    #[test]
    fn test_verbose_forces_debug() {
        let config = LoggingConfig::new(LogFormat::Json, "error".to_string(), true);
        assert_eq!(config.directives(), "debug,sqlx=warn");
    }
}
