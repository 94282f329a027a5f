//! Engine and logging configuration.

use std::time::Duration;

use crate::clock::DEFAULT_IN_MEMORY_THRESHOLD;

/// Log format options for structured logging
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable multi-line output
    Pretty,
    /// One line per event: timestamp level target fields message
    #[default]
    Compact,
}

/// Structured logging configuration.
///
/// `RUST_LOG`, when set, takes precedence over `log_level`.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Level for this crate's targets (e.g. "info", "debug")
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Sleeps at or below this run in memory instead of on a durable clock.
    pub default_clock_threshold: Duration,
    /// Install a global subscriber when the engine is built.
    pub observability: Option<ObservabilityConfig>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_clock_threshold: DEFAULT_IN_MEMORY_THRESHOLD,
            observability: None,
        }
    }
}
