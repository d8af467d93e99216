//! Tracing bootstrap for binaries, benches and tests.

use crate::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Install a compact fmt subscriber.
///
/// `RUST_LOG` wins; otherwise `default_level` (e.g. `"info"` or
/// `"trueno_cache=debug"`) is used. Calling this again after a subscriber is
/// installed is a no-op.
///
/// # Errors
/// Returns `InvalidInput` if neither filter parses.
pub fn init_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| Error::InvalidInput(format!("log filter: {e}")))?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("logging initialised");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_logging("warn").is_ok());
        assert!(init_logging("debug").is_ok());
    }
}
