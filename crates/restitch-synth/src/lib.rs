//! Synthesis engine for restitch.
//!
//! The pipeline: the sketch enumerator proposes control-flow skeletons
//! justified by the traces, the decompositional completer fills their
//! statement slots with enumerative search, and the trace interpreter
//! (in `restitch-interp`) prunes and finally certifies candidates. The
//! driver fans the whole pipeline out over a portfolio of heuristic
//! configurations and takes the first solution.

mod closure;
mod completer;
mod driver;
mod enumerative;
mod queue;
mod sketch;

#[cfg(test)]
mod completer_tests;
#[cfg(test)]
mod enumerative_tests;
#[cfg(test)]
pub(crate) mod testutil;

pub use completer::DecompositionalCompleter;
pub use driver::{Deobfuscator, Job};
pub use enumerative::{EnumerativeSearch, SearchOutcome};
pub use queue::{PriorityQueue, RandomModel, SearchModel, SizeModel};
pub use sketch::{ControlFlowSketch, SketchEnumerator, StructuralSketches, structural_sketches};

/// Errors the synthesis engine surfaces to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The overall deobfuscation budget ran out.
    #[error("synthesis timed out")]
    SynthesisTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;
