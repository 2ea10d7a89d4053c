//! Diagnostics of the logging engine itself
//!
//! Rotation, compression and remote delivery failures are reported through
//! `tracing`. Applications that already install a subscriber get them for
//! free; others can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Install a fmt subscriber filtered by `filter` (falls back to `info`)
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(filter: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::Observability(e.to_string()))?;

    tracing::debug!("Tracing initialized for the logging engine");
    Ok(())
}
