//! Trace-interpreted equivalence checking.

use indexmap::IndexSet;

use restitch_core::Program;
use restitch_core::trace::Trace;
use restitch_core::VarFacts;

use crate::runner::TraceRunner;

/// Decides whether a candidate program is equivalent to the obfuscated
/// function on every recorded trace. Unknowns are tolerated so phantom
/// sketches can be checked with their stand-in nodes in place.
pub struct EquivalenceChecker<'a> {
    runner: TraceRunner<'a>,
}

impl<'a> EquivalenceChecker<'a> {
    pub fn new(facts: &'a VarFacts) -> Self {
        Self {
            runner: TraceRunner::new(facts),
        }
    }

    /// Strict check: every trace must complete with final-state agreement,
    /// no variable may be pruned away.
    pub fn check_eq(&self, prog: &Program, traces: &[Trace]) -> bool {
        traces.iter().all(|trace| {
            self.runner
                .run_check(prog, &trace.items, false, true)
                .complete
        })
    }

    /// Pruning check: every trace must complete, divergent dead variables
    /// are collected instead of failing. Returns the union of pruned
    /// variables, or `None` when some trace does not complete.
    pub fn check_eq_pruning(&self, prog: &Program, traces: &[Trace]) -> Option<IndexSet<String>> {
        let mut pruned = IndexSet::new();
        for trace in traces {
            let verdict = self.runner.run_check(prog, &trace.items, true, true);
            if !verdict.complete {
                return None;
            }
            pruned.extend(verdict.pruned);
        }
        Some(pruned)
    }
}
