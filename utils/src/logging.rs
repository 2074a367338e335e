//! Structured logging initialisation.
//!
//! Two output formats are supported:
//! - [`LogFormat::Human`] — coloured, human-readable lines (development).
//! - [`LogFormat::Json`] — newline-delimited JSON (production).
//!
//! The filter level can be overridden at runtime via the `RUST_LOG`
//! environment variable. When `RUST_LOG` is not set, the preset's level
//! string is used (e.g. `"info"`, `"debug,quill_node=trace"`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Selects the output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

/// Bundled defaults per entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPreset {
    /// One-shot CLI commands: human output, warnings and up.
    Cli,
    /// Long-running daemon: human output, info and up.
    Daemon,
    /// Test harnesses: human output, debug and up; never panics when a
    /// subscriber is already installed.
    Tests,
}

impl LogPreset {
    pub fn format(&self) -> LogFormat {
        LogFormat::Human
    }

    pub fn level(&self) -> &'static str {
        match self {
            Self::Cli => "warn",
            Self::Daemon => "info",
            Self::Tests => "debug",
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// # Panics
///
/// Panics if a global subscriber has already been set, except under
/// [`LogPreset::Tests`] where re-initialisation is silently ignored.
pub fn init_logging(preset: LogPreset, format: LogFormat, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Human => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if let Err(error) = result {
        if !matches!(preset, LogPreset::Tests) {
            panic!("logging already initialised: {error}");
        }
    }
}
