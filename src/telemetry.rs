//! Structured logging for the server process.
//!
//! stdout carries the protocol, so everything goes to stderr.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter, e.g. `jsonschema_ls=debug`.
pub const LOG_ENV: &str = "JSONSCHEMA_LS_LOG";

const DEFAULT_FILTER: &str = "info";

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first call; later calls do nothing.
///
/// `level` wins over [`LOG_ENV`], which wins over the default `info`.
pub fn initialise(level: Option<&str>) -> Result<(), TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(&resolve_filter(level)))
        .map(|_| ())
}

fn resolve_filter(level: Option<&str>) -> String {
    level
        .filter(|filter| !filter.trim().is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .filter(|filter| !filter.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn install_subscriber(filter: &str) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
