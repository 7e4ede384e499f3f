//! Process-wide tracing/logging setup.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops and
/// return `false`.
pub fn init() -> bool {
    tracing::init(tracing::LogFormat::from_env())
}

/// Tracing configuration (filters, output format).
pub mod tracing;
