// Logging setup

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "warn";

/// Filter forced by `--verbose`
pub const VERBOSE_FILTER: &str = "debug";

/// Build the event filter for the given verbosity
pub fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber, writing to stderr
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(verbose: bool) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_filter() {
        assert_eq!(env_filter(true).to_string(), VERBOSE_FILTER);
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging(false);
        assert!(!init_logging(true));
    }
}
