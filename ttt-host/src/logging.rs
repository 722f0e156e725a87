//! Tracing setup: fmt output to stderr, filtered by RUST_LOG or the configured fallback level.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `default_level` is used when RUST_LOG is unset or unparsable.
///
/// # Errors
///
/// - `default_level` is not a valid filter directive
/// - a global subscriber is already installed
pub fn init_tracing(default_level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(default_level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()?;
    tracing::debug!(default_level, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let _ = init_tracing("info");
        assert!(init_tracing("info").is_err());
    }
}
