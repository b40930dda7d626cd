//! Subscriber setup for binaries and tests

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. `RUST_LOG` takes precedence over `default_filter`.
///
/// Fails instead of panicking when a global subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        // another test may have installed one already
        let _ = init_logging("debug");
        assert!(init_logging("info").is_err());
    }
}
