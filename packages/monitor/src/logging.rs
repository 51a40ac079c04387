//! Logging setup
//!
//! Installs a `tracing` subscriber filtered by `RUST_LOG`, falling back to
//! `info` for this crate.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Build the filter from `RUST_LOG`, or from `default` when unset
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global fmt subscriber
///
/// Returns false if a subscriber was already installed, which is harmless.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_LOG_FILTER))
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_fallback() {
        let filter = env_filter("whalewatch_monitor=debug");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging();
        assert!(!init_logging());
    }
}
