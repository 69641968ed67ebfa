//! Tracing/logging setup shared by every process embedding the engine.

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}
