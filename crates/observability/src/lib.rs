//! Tracing and logging setup shared by every binary in the workspace.

/// Initialize process-wide tracing using `DOCKJOB_LOG_FORMAT` (default JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use self::tracing::LogFormat;
