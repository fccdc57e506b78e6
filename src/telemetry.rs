//! Tracing initialisation.
//!
//! Structured logging for the whole appliance via `tracing` and
//! `tracing-subscriber`. The configured level is the default; `RUST_LOG`
//! overrides it with a full env-filter directive when set.

use crate::error::{MeterError, MeterResult};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// Single-line format without decoration (production default).
    #[default]
    Compact,
    /// Multi-line human format with colors.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

/// Install the global subscriber.
pub fn init(level: &str, format: LogFormat) -> MeterResult<()> {
    let level: Level = level
        .parse()
        .map_err(|_| MeterError::Configuration(format!("invalid log level '{level}'")))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let fmt_layer = match format {
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| MeterError::Configuration(format!("tracing init failed: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_unknown_level() {
        assert!(init("chatty", LogFormat::Compact).is_err());
    }
}
