//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log levels from least to most verbose
const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level` when set. Events go to
/// stderr so stdout stays free for status output.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Failed to install subscriber: {}", e)))?;

    Ok(())
}

/// Lower the `base` threshold by one level per `verbose` step
///
/// Saturates at `trace`.
pub fn resolve_log_level(base: &str, verbose: u8) -> crate::Result<&'static str> {
    let start = LEVELS
        .iter()
        .position(|level| level.eq_ignore_ascii_case(base))
        .ok_or_else(|| {
            crate::Error::Config(format!(
                "Invalid log level '{}', must be one of: {}",
                base,
                LEVELS.join(", ")
            ))
        })?;

    let index = (start + usize::from(verbose)).min(LEVELS.len() - 1);
    Ok(LEVELS[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_without_verbosity() {
        assert_eq!(resolve_log_level("warn", 0).unwrap(), "warn");
        assert_eq!(resolve_log_level("INFO", 0).unwrap(), "info");
    }

    #[test]
    fn test_each_verbose_step_lowers_threshold() {
        assert_eq!(resolve_log_level("warn", 1).unwrap(), "info");
        assert_eq!(resolve_log_level("warn", 2).unwrap(), "debug");
        assert_eq!(resolve_log_level("warn", 3).unwrap(), "trace");
    }

    #[test]
    fn test_verbosity_saturates_at_trace() {
        assert_eq!(resolve_log_level("debug", 10).unwrap(), "trace");
        assert_eq!(resolve_log_level("trace", 255).unwrap(), "trace");
    }

    #[test]
    fn test_invalid_base_level() {
        let err = resolve_log_level("loud", 0).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }
}
