//! Structured observability hooks for pipeline lifecycle events.
//!
//! The narrator produces the human transcript; these events are the
//! machine-readable counterpart. Each one carries an `event` field so JSON
//! output can be filtered without parsing messages.
//!
//! Run with `RUST_LOG=dtsgen=debug` to include per-process events.

use tracing::{debug, info, warn};

/// RAII guard that enters a package-scoped tracing span for one run.
///
/// ```ignore
/// let _span = RunSpan::enter("lodash", "2f1c...");
/// // events emitted below carry package=lodash run_id=2f1c...
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(package: &str, run_id: &str) -> Self {
        let span = tracing::info_span!("dtsgen.run", package = %package, run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a run started with the given mode set.
pub fn emit_run_started(package: &str, modes: &[&str]) {
    info!(event = "run.started", package = %package, modes = ?modes);
}

/// Emit event: a run was skipped because a finished result already exists.
pub fn emit_run_skipped(package: &str) {
    info!(event = "run.skipped", package = %package, reason = "finished");
}

/// Emit event: run finished. `outcome` is the status flag that was set.
pub fn emit_run_finished(package: &str, duration_ms: u64, outcome: &str) {
    info!(
        event = "run.finished",
        package = %package,
        duration_ms = duration_ms,
        outcome = %outcome,
    );
}

/// Emit event: one stage finished across its modes.
pub fn emit_stage_finished(stage: &str, produced: usize, failed: usize) {
    info!(
        event = "stage.finished",
        stage = %stage,
        produced = produced,
        failed = failed,
    );
}

pub fn emit_process_finished(command: &str, exit_code: i32, timed_out: bool, duration_ms: u64) {
    debug!(
        event = "process.finished",
        command = %command,
        exit_code = exit_code,
        timed_out = timed_out,
        duration_ms = duration_ms,
    );
}

/// Emit event: cleanup after a run failed (warning level).
pub fn emit_cleanup_error(package: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.cleanup_error", package = %package, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_without_subscriber() {
        let _span = RunSpan::enter("left-pad", "run-1");
        emit_run_started("left-pad", &["extraction", "generation"]);
        emit_stage_finished("examples", 2, 0);
        emit_process_finished("echo hi", 0, false, 3);
        emit_run_finished("left-pad", 10, "usable");
    }
}
