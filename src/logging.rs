//! Opt-in `tracing` subscriber setup for binaries and tests embedding the index.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{AggError, Result};

/// Installs a global fmt subscriber filtered by `filter` (e.g. `"levelagg=debug"`).
///
/// Fails with [`AggError::Config`] when the filter does not parse or a global
/// subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| AggError::Config(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| AggError::Config("logging already initialized".into()))
}
