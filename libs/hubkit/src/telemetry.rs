//! Logging initialization.
//!
//! One `tracing_subscriber` registry for the whole process, initialized once
//! by the host binary. Filtering follows, in order of precedence, the
//! `RUST_LOG` environment variable, then the level passed in (typically
//! mapped from `-v` flags).

use tracing_subscriber::EnvFilter;

/// Map `-v` occurrences to a default filter directive.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize process-wide logging. Safe to call more than once; subsequent
/// calls are no-ops (first subscriber wins).
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_mapping_saturates_at_trace() {
        assert_eq!(level_for_verbosity(0), "warn");
        assert_eq!(level_for_verbosity(1), "info");
        assert_eq!(level_for_verbosity(2), "debug");
        assert_eq!(level_for_verbosity(9), "trace");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_logging("info");
        init_logging("debug");
    }
}
