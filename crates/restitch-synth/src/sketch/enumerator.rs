//! Heuristic enumeration of control-flow sketches.
//!
//! A BFS worklist over partial sketches. Expanding a hole tries every
//! ordered guard combination drawn from the guards that occur in all of the
//! hole's sub-traces, dispatches the structural rules on each, and always
//! also offers to settle the hole as a plain statement slot. Smaller
//! sketches are yielded first.

use std::collections::VecDeque;
use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::debug;

use restitch_core::HeuristicConfig;
use restitch_core::config::HeuristicRules;
use restitch_core::source::TraceSource;
use restitch_core::trace::Subtrace;
use restitch_core::VarFacts;

use super::rules::{Decomposition, RuleCtx};
use super::{ControlFlowSketch, subtrace_guards, subtrace_statements};

/// Lazy producer of complete control-flow sketches, smallest first.
pub struct SketchEnumerator<'a> {
    config: &'a HeuristicConfig,
    rules: RuleCtx<'a>,
    worklist: VecDeque<ControlFlowSketch>,
    deadline: Option<Instant>,
    timed_out: bool,
    complete_count: usize,
    partial_count: usize,
    pruned_count: usize,
}

impl<'a> SketchEnumerator<'a> {
    pub fn new(
        facts: &'a VarFacts,
        config: &'a HeuristicConfig,
        traces: Vec<Subtrace>,
        has_return_value: bool,
        deadline: Option<Instant>,
    ) -> Self {
        let mut worklist = VecDeque::new();
        worklist.push_back(ControlFlowSketch::initial(traces, has_return_value));
        Self {
            config,
            rules: RuleCtx::new(facts),
            worklist,
            deadline,
            timed_out: false,
            complete_count: 0,
            partial_count: 0,
            pruned_count: 0,
        }
    }

    /// Whether enumeration stopped on the deadline rather than exhaustion.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn complete_count(&self) -> usize {
        self.complete_count
    }

    pub fn partial_count(&self) -> usize {
        self.partial_count
    }

    pub fn pruned_count(&self) -> usize {
        self.pruned_count
    }

    /// Expand the leftmost traced hole of a sketch in every justified way.
    fn expand_hole(&self, sketch: &ControlFlowSketch) -> Vec<ControlFlowSketch> {
        let hole = sketch
            .prog
            .leftmost_unknown()
            .expect("expanding a complete sketch");
        let mut remaining = sketch.trace_map.clone();
        let traces = remaining.shift_remove(&hole).unwrap_or_default();

        // Only guards every sub-trace observes can shape this hole. Order
        // and multiplicity follow the first sub-trace.
        let mut common_guards: Option<IndexSet<TraceSource>> = None;
        for st in &traces {
            let guards: IndexSet<TraceSource> = subtrace_guards(st).into_iter().collect();
            common_guards = Some(match common_guards {
                None => guards,
                Some(prev) => prev.intersection(&guards).cloned().collect(),
            });
        }
        let common_guards = common_guards.unwrap_or_default();
        let guards: Vec<TraceSource> = match traces.first() {
            Some(first) => {
                let mut seen = IndexSet::new();
                subtrace_guards(first)
                    .into_iter()
                    .filter(|g| common_guards.contains(g) && seen.insert(g.clone()))
                    .collect()
            }
            None => Vec::new(),
        };

        let mut common_stmts: Option<IndexSet<String>> = None;
        for st in &traces {
            let stmts: IndexSet<String> = subtrace_statements(st)
                .map(|item| item.source.src.clone())
                .collect();
            common_stmts = Some(match common_stmts {
                None => stmts,
                Some(prev) => prev.intersection(&stmts).cloned().collect(),
            });
        }
        let common_stmts = common_stmts.unwrap_or_default();

        let mut results = Vec::new();

        for len in 1..=2usize {
            for comb in guards.iter().combinations(len) {
                if comb.iter().any(|g| {
                    self.config
                        .debug_guard_blacklist
                        .iter()
                        .any(|kw| g.src.contains(kw.as_str()))
                }) {
                    continue;
                }
                for decomp in self.decide_structure(&comb, &traces) {
                    results.push(self.apply_decomposition(
                        sketch,
                        hole,
                        &remaining,
                        &traces,
                        comb[0],
                        &common_stmts,
                        decomp,
                    ));
                }
            }
        }

        // The hole may also be a plain statement block: the statements all
        // sub-traces share, with nothing structural around them.
        if !common_stmts.is_empty() {
            let mut prog = sketch.prog.clone();
            prog.release_unknown(hole);
            let subtraces: Vec<Subtrace> = traces
                .iter()
                .map(|st| {
                    let kept: Vec<_> = st
                        .iter()
                        .filter(|item| common_stmts.contains(&item.source.src))
                        .cloned()
                        .collect();
                    Subtrace::from(kept)
                })
                .filter(|st| !st.is_empty())
                .collect();
            let mut stmt_map = sketch.stmt_map.clone();
            stmt_map.insert(hole, subtraces);
            results.push(ControlFlowSketch::new(
                prog,
                remaining.clone(),
                stmt_map,
                sketch.has_return_value,
            ));
        }

        results
    }

    /// Graft a rule's subprogram over the hole, rekey its trace map, and
    /// park the pre-guard statements as the statement slot in front of it.
    #[allow(clippy::too_many_arguments)]
    fn apply_decomposition(
        &self,
        sketch: &ControlFlowSketch,
        hole: restitch_core::NodeId,
        remaining: &IndexMap<restitch_core::NodeId, Vec<Subtrace>>,
        traces: &[Subtrace],
        first_guard: &TraceSource,
        common_stmts: &IndexSet<String>,
        decomp: Decomposition,
    ) -> ControlFlowSketch {
        let mut prog = sketch.prog.clone();
        let id_map = prog.graft(hole, &decomp.subprog);

        let mut trace_map = remaining.clone();
        for (sub_id, sub_traces) in decomp.trace_map {
            trace_map.insert(id_map[&sub_id], sub_traces);
        }

        // Everything before the decomposing guard that all sub-traces agree
        // on belongs to a statement slot in front of the new construct.
        let pre_guard: Vec<Subtrace> = traces
            .iter()
            .map(|st| {
                let cut = st
                    .iter()
                    .position(|item| item.source.matches(first_guard))
                    .unwrap_or(st.len());
                let kept: Vec<_> = st[..cut]
                    .iter()
                    .filter(|item| common_stmts.contains(&item.source.src))
                    .cloned()
                    .collect();
                Subtrace::from(kept)
            })
            .filter(|st| !st.is_empty())
            .collect();

        let mut stmt_map = sketch.stmt_map.clone();
        let new_root = id_map[&decomp.subprog.root()];
        if !pre_guard.is_empty() {
            stmt_map.insert(new_root, pre_guard);
        }

        ControlFlowSketch::new(prog, trace_map, stmt_map, sketch.has_return_value)
    }

    /// Classify a guard combination into the one structural rule that fits;
    /// single guards try While before ITE, pairs walk the compound rules.
    fn decide_structure(
        &self,
        comb: &[&TraceSource],
        traces: &[Subtrace],
    ) -> Vec<Decomposition> {
        let enabled = self.config.enabled_rules;
        if let &[guard] = comb {
            if enabled.contains(HeuristicRules::WHILE) {
                let r = self.rules.while_single(guard, traces, false);
                if !r.is_empty() {
                    return r;
                }
            }
            if enabled.contains(HeuristicRules::WHILE_NEGATED) {
                let r = self.rules.while_single(guard, traces, true);
                if !r.is_empty() {
                    return r;
                }
            }
            if enabled.contains(HeuristicRules::ITE) {
                let r = self.rules.ite(guard, traces);
                if !r.is_empty() {
                    return r;
                }
            }
            return Vec::new();
        }

        let guards: Vec<TraceSource> = comb.iter().map(|g| (*g).clone()).collect();
        let multi: [(HeuristicRules, bool, bool); 4] = [
            (HeuristicRules::WHILE_CONJUNCTION, true, false),
            (HeuristicRules::WHILE_DISJUNCTION, false, false),
            (HeuristicRules::WHILE_CONJUNCTION_NEGATED, true, true),
            (HeuristicRules::WHILE_DISJUNCTION_NEGATED, false, true),
        ];
        for (rule, conjunction, swap) in multi {
            if !enabled.contains(rule) {
                continue;
            }
            let result = if conjunction {
                self.rules.while_conj(&guards, traces, swap)
            } else {
                self.rules.while_disj(&guards, traces, swap)
            };
            if let Some(d) = result {
                return vec![d];
            }
        }
        Vec::new()
    }
}

impl Iterator for SketchEnumerator<'_> {
    type Item = ControlFlowSketch;

    fn next(&mut self) -> Option<ControlFlowSketch> {
        loop {
            let front = self.worklist.front()?;
            if front.prog.node_count() >= self.config.prog_size {
                return None;
            }
            if self.deadline.is_some_and(|d| Instant::now() > d) {
                self.timed_out = true;
                return None;
            }

            let sketch = self.worklist.pop_front().expect("front just checked");
            if sketch.is_complete() {
                self.complete_count += 1;
                let mut sketch = sketch;
                sketch.make_explicit();
                return Some(sketch);
            }

            for new_sketch in self.expand_hole(&sketch) {
                if new_sketch.is_feasible() {
                    self.partial_count += 1;
                    self.worklist.push_back(new_sketch);
                } else {
                    self.pruned_count += 1;
                    if self.config.log_pruned_sketches {
                        debug!("pruning infeasible partial sketch: {}", new_sketch.prog);
                    }
                }
            }
        }
    }
}
