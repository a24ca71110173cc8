//! Trace interpreter and equivalence oracle for restitch.
//!
//! Programs are never compiled during synthesis: candidate (partial or
//! complete) programs execute against the recorded traces of the obfuscated
//! binary, with control flow resolved by the truth values the traces carry.
//! This crate provides that interpreter plus the two clients the synthesis
//! engine needs: the equivalence checker for complete candidates and the
//! pruner for partial ones.

mod checker;
mod pruner;
mod runner;
mod signal;

#[cfg(test)]
mod runner_tests;

pub use checker::EquivalenceChecker;
pub use pruner::TracePruner;
pub use runner::{RunnerState, TraceRunner, Verdict};
pub use signal::ExecSignal;
