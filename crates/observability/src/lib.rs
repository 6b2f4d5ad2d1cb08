//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing with the format chosen by `PLAYPULSE_LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber configuration (filters, formats).
pub mod tracing;
