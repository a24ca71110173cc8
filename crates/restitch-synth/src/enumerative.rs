//! Best-first enumerative synthesis of statement sequences.
//!
//! Fills the statement slots of a settled sketch: expand partial programs in
//! priority order (size by default), memoize on the canonical printed form,
//! discard programs that already contradict every trace, and record each
//! complete match under the set of variables that had to be pruned to accept
//! it. The empty pruned set is an exact match and stops the search.

use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use log::debug;

use restitch_core::format_compact;
use restitch_core::grammar::{Nonterminal, ProdKind, TerminalPool};
use restitch_core::program::{Node, Payload, Program};
use restitch_core::stats::SearchStats;
use restitch_core::trace::Trace;
use restitch_core::VarFacts;
use restitch_interp::{TracePruner, TraceRunner};

use crate::queue::{PriorityQueue, SearchModel};
use crate::{Error, Result};

/// Result of one enumerative search.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// The per-slot budget ran out (the overall budget raises instead).
    pub timed_out: bool,
    /// Smallest matching program per pruned-variable set, sorted keys.
    pub solutions: IndexMap<Vec<String>, Program>,
}

impl SearchOutcome {
    /// The solution whose pruned set is smallest.
    pub fn best(&self) -> Option<(&Vec<String>, &Program)> {
        self.solutions.iter().min_by_key(|(vars, _)| vars.len())
    }
}

/// One enumerative search over statement-sequence expansions.
pub struct EnumerativeSearch<'a> {
    pub facts: &'a VarFacts,
    pub pool: &'a TerminalPool,
    pub traces: &'a [Trace],
    /// Stop at the first match even if variables had to be pruned.
    pub return_on_first: bool,
    /// Accept candidates that consume a whole returning trace. Needed when
    /// searching over a complete sketch, whose candidates legitimately end
    /// in `return`.
    pub allow_return: bool,
    pub overall_deadline: Option<Instant>,
    pub slot_deadline: Option<Instant>,
}

impl<'a> EnumerativeSearch<'a> {
    /// Run the search from `initial` (a bare hole for per-slot synthesis, or
    /// a whole sketch with open statement slots).
    pub fn run(
        &self,
        initial: Program,
        model: &mut dyn SearchModel,
        mut pruner: Option<&mut TracePruner<'_>>,
        stats: &mut SearchStats,
    ) -> Result<SearchOutcome> {
        let runner = TraceRunner::new(self.facts);
        let mut outcome = SearchOutcome::default();
        let mut cache: IndexSet<String> = IndexSet::new();
        let mut worklist: PriorityQueue<Program> = PriorityQueue::new();
        let priority = model.priority(&initial);
        worklist.push(priority, initial);

        while let Some(prog) = worklist.pop() {
            if self.overall_deadline.is_some_and(|d| Instant::now() > d) {
                return Err(Error::SynthesisTimeout);
            }
            if self.slot_deadline.is_some_and(|d| Instant::now() > d) {
                debug!("per-slot synthesis budget exhausted");
                outcome.timed_out = true;
                return Ok(outcome);
            }
            stats.iterations += 1;

            let key = format_compact(&prog);
            if !cache.insert(key) {
                stats.cache_hits += 1;
                continue;
            }

            if prog.is_complete() {
                stats.candidates += 1;
                let mut pruned: IndexSet<String> = IndexSet::new();
                let satisfied = self.traces.iter().all(|trace| {
                    let verdict = runner.run_check(&prog, &trace.items, true, false);
                    pruned.extend(verdict.pruned.clone());
                    verdict.complete
                });
                if satisfied {
                    let mut key: Vec<String> = pruned.into_iter().collect();
                    key.sort();
                    let exact = key.is_empty();
                    outcome.solutions.entry(key).or_insert_with(|| prog.clone());
                    if exact || self.return_on_first {
                        return Ok(outcome);
                    }
                }
                continue;
            }

            if let Some(pruner) = pruner.as_deref_mut() {
                if pruner.prune(&prog, self.traces, self.allow_return) {
                    stats.pruned_partial += 1;
                    continue;
                }
            }
            stats.not_pruned_partial += 1;

            for next in self.expansions(&prog) {
                if self.too_few_terminals(&next) {
                    stats.syntax_pruned += 1;
                    continue;
                }
                let priority = model.priority(&next);
                worklist.push(priority, next);
            }
        }
        Ok(outcome)
    }

    /// All one-step expansions of the leftmost hole. Control-flow
    /// productions are not offered: shape is the sketch enumerator's job.
    fn expansions(&self, prog: &Program) -> Vec<Program> {
        let hole = prog.leftmost_unknown().expect("partial program");
        let nonterm = match prog.node(hole) {
            Node::Unknown { nonterm } => *nonterm,
            Node::Value { .. } => unreachable!("hole is not a node"),
        };

        let mut out = Vec::new();
        match nonterm {
            Nonterminal::Stmt => {
                for text in &self.pool.stmts {
                    let mut next = prog.clone();
                    next.expand(
                        hole,
                        ProdKind::SourceStmt,
                        Some(Payload::Stmt(text.clone())),
                    );
                    out.push(next);
                }
            }
            Nonterminal::Guard => {
                for text in &self.pool.guards {
                    let mut next = prog.clone();
                    next.expand(
                        hole,
                        ProdKind::SourceGuard,
                        Some(Payload::Guard(restitch_core::GuardSpec::single(
                            text.clone(),
                            false,
                        ))),
                    );
                    out.push(next);
                }
            }
            _ => {
                for &kind in ProdKind::stmt_expansions(nonterm) {
                    let mut next = prog.clone();
                    next.expand(hole, kind, None);
                    out.push(next);
                }
            }
        }
        out
    }

    /// A partial program with more open slots than there are terminals left
    /// can never complete.
    fn too_few_terminals(&self, prog: &Program) -> bool {
        let mut needed_stmts = 0usize;
        let mut needed_guards = 0usize;
        for &unk in prog.unknowns() {
            match prog.node(unk) {
                Node::Unknown {
                    nonterm: Nonterminal::Guard,
                } => needed_guards += 1,
                Node::Unknown { .. } => needed_stmts += 1,
                Node::Value { .. } => unreachable!("hole is not a node"),
            }
        }
        self.pool.stmts.len() < needed_stmts || self.pool.guards.len() < needed_guards
    }
}
