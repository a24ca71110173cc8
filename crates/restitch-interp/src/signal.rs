//! Internal signals of the trace interpreter.

use thiserror::Error;

/// How a walk over a trace stopped early. These are control-flow signals,
/// not user-facing errors; [`crate::TraceRunner::run_check`] consumes them
/// into a [`crate::Verdict`] before anything crosses the crate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecSignal {
    /// No remaining trace item matches the current leaf.
    #[error("no matching trace index for the current statement")]
    TraceIdxNotFound,
    /// Execution reached an open hole outside phantom mode.
    #[error("encountered an unexpanded hole")]
    UnknownEncounter,
    /// The program consumed the final trace item.
    #[error("reached the end of the trace")]
    TraceEnd,
}
