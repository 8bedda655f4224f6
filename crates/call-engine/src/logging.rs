//! Tracing subscriber setup for `voicedesk-server`.
//!
//! The configured level is the floor; `RUST_LOG` directives are layered on
//! top so a single module can be turned up without restarting with a new
//! level, e.g. `RUST_LOG=voicedesk_call_engine::orchestrator=trace`.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CallEngineError, Result};

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Append `file:line` to every event
    pub source_location: bool,
    /// Emit an event when a span is entered and when it closes
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            source_location: false,
            span_events: false,
        }
    }
}

impl LoggingConfig {
    /// Start from a level name as given on the command line (`info`, `DEBUG`, ...)
    pub fn from_level_name(level: &str) -> Result<Self> {
        let level = level
            .trim()
            .parse::<Level>()
            .map_err(|_| CallEngineError::configuration(format!("unknown log level '{}'", level)))?;
        Ok(Self {
            level,
            ..Self::default()
        })
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn source_location(mut self, enabled: bool) -> Self {
        self.source_location = enabled;
        self
    }

    pub fn span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    fn span_event_mask(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.level.into()))
        .with_span_events(config.span_event_mask())
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| CallEngineError::configuration(format!("logging setup failed: {}", e)))?;

    tracing::info!(
        level = %config.level,
        format = ?config.format,
        "🚀 voicedesk-server v{}",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}
