//! Logging infrastructure for compaction observability.
//!
//! All events are emitted through `tracing` with target `"delta_compactor"`
//! and carry an `event` field for filtering.
//!
//! ## Library Integration
//!
//! The crate never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem (e.g., "planner", "dedupe", "barrier")
//! - Use `%` for Display, `?` for Debug formatting
//! - Avoid per-row fields; log once per file, bucket or task

/// Target for all compaction log events.
pub(crate) const COMPACTOR_TARGET: &str = "delta_compactor";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "planner",
///     event = "deltas_discovered",
///     partition = %partition,
///     count = deltas.len(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::COMPACTOR_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::COMPACTOR_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::COMPACTOR_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::COMPACTOR_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
