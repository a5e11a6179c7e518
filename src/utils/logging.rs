// ============================================================================
// Logging Setup
// tracing-subscriber initialisation driven by the LOGLEVEL variable
// ============================================================================

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Parse a LOGLEVEL value. Unknown values fall back to INFO.
pub fn parse_level(value: &str) -> Level {
    match value.trim().to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a fmt layer filtered by `LOGLEVEL` (default INFO) plus any
/// `RUST_LOG` directives. Later calls are no-ops, as is a call made after
/// another global subscriber was installed.
pub fn setup_logger() {
    INIT.call_once(|| {
        let level = env::var("LOGLEVEL")
            .map(|value| parse_level(&value))
            .unwrap_or(Level::INFO);

        let installed = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true),
            )
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
            .try_init()
            .is_ok();

        if installed {
            tracing::debug!(%level, "logger initialised");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level(" WARN "), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_setup_is_idempotent() {
        setup_logger();
        setup_logger();
        tracing::info!("still logging");
    }
}
