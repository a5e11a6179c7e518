// ============================================================================
// Utilities Module
// ============================================================================

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "logging")]
pub use logging::setup_logger;
