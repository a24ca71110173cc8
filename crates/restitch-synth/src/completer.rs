//! Decompositional completion of control-flow sketches.
//!
//! A complete sketch fixes the shape; what is left is filling its statement
//! slots. Completion narrows every trace to the variables that can matter,
//! cheaply rejects the sketch by phantom evaluation, synthesizes each slot
//! separately, and stitches the per-slot programs back together for the
//! final end-to-end check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::{debug, info};

use restitch_core::format_c;
use restitch_core::grammar::{Nonterminal, TerminalPool};
use restitch_core::program::{Node, NodeId, Payload, Program};
use restitch_core::source::{SourceKind, TraceSource};
use restitch_core::stats::SearchStats;
use restitch_core::trace::Trace;
use restitch_core::{HeuristicConfig, SynthesisConfig, VarFacts};
use restitch_interp::{EquivalenceChecker, TracePruner};

use crate::closure::{dependency_closure, min_vars};
use crate::enumerative::EnumerativeSearch;
use crate::queue::{SearchModel, SizeModel};
use crate::sketch::{ControlFlowSketch, SketchEnumerator, structural_sketches};
use crate::{Error, Result};

/// Completes sketches against the recorded traces.
pub struct DecompositionalCompleter<'a> {
    facts: &'a VarFacts,
    config: &'a SynthesisConfig,
}

impl<'a> DecompositionalCompleter<'a> {
    pub fn new(facts: &'a VarFacts, config: &'a SynthesisConfig) -> Self {
        Self { facts, config }
    }

    /// Run the full pipeline under one heuristic configuration. Returns the
    /// first program equivalent to the traces, `None` when the search space
    /// is exhausted (or the worker is cancelled), and
    /// [`Error::SynthesisTimeout`] when the overall budget runs out.
    pub fn deobfuscate(
        &self,
        traces: &[Trace],
        has_return_value: bool,
        heuristics: &HeuristicConfig,
        cancel: &AtomicBool,
        stats: &mut SearchStats,
    ) -> Result<Option<Program>> {
        let overall_deadline = Instant::now() + self.config.overall_timeout;
        let mut model = SizeModel;

        if self.config.disable_heuristics {
            return self.deobfuscate_structural(
                traces,
                has_return_value,
                overall_deadline,
                cancel,
                &mut model,
                stats,
            );
        }

        let subtraces = traces.iter().map(Trace::as_subtrace).collect();
        let mut enumerator = SketchEnumerator::new(
            self.facts,
            heuristics,
            subtraces,
            has_return_value,
            Some(overall_deadline),
        );

        let mut found = None;
        for sketch in enumerator.by_ref() {
            if Instant::now() > overall_deadline {
                return Err(Error::SynthesisTimeout);
            }
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            info!("trying sketch: {}", sketch.prog);
            if let Some(prog) =
                self.complete_sketch(sketch, traces, overall_deadline, &mut model, stats)?
            {
                found = Some(prog);
                break;
            }
        }

        stats.complete_sketches += enumerator.complete_count();
        stats.partial_sketches += enumerator.partial_count();
        stats.pruned_sketches += enumerator.pruned_count();
        if found.is_none() && enumerator.timed_out() {
            return Err(Error::SynthesisTimeout);
        }
        Ok(found)
    }

    /// Ablation path: trace-blind sketches, whole-sketch synthesis.
    fn deobfuscate_structural(
        &self,
        traces: &[Trace],
        has_return_value: bool,
        overall_deadline: Instant,
        cancel: &AtomicBool,
        model: &mut dyn SearchModel,
        stats: &mut SearchStats,
    ) -> Result<Option<Program>> {
        let mut seen = IndexSet::new();
        let guard_pool: Vec<TraceSource> = traces
            .iter()
            .flat_map(|t| t.sources())
            .filter(|s| s.kind == SourceKind::Guard)
            .map(|s| s.without_line_and_val())
            .filter(|s| seen.insert(s.clone()))
            .collect();

        for prog in structural_sketches(guard_pool, 100) {
            if Instant::now() > overall_deadline {
                return Err(Error::SynthesisTimeout);
            }
            if cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            stats.complete_sketches += 1;

            let mut stmt_map = IndexMap::new();
            for &unk in prog.unknowns() {
                stmt_map.insert(unk, traces.iter().map(Trace::as_subtrace).collect());
            }
            let sketch = ControlFlowSketch::new(prog, IndexMap::new(), stmt_map, has_return_value);
            if let Some(found) =
                self.complete_sketch(sketch, traces, overall_deadline, model, stats)?
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Complete one sketch, or reject it.
    fn complete_sketch(
        &self,
        mut sketch: ControlFlowSketch,
        traces: &[Trace],
        overall_deadline: Instant,
        model: &mut dyn SearchModel,
        stats: &mut SearchStats,
    ) -> Result<Option<Program>> {
        let min_vars_map = min_vars(&sketch, traces, self.facts);
        let initial_mvs: IndexSet<String> =
            min_vars_map.values().flatten().cloned().collect();
        let mvs_closure =
            dependency_closure(&sketch, self.facts, &initial_mvs, self.config.closure_depth);
        if initial_mvs.is_empty() && mvs_closure.is_empty() {
            debug!("no required variables found; rejecting sketch");
            return Ok(None);
        }

        let mut trace_specs: IndexMap<NodeId, Vec<Trace>> = sketch
            .stmt_map
            .iter()
            .map(|(&slot, sts)| {
                let ts = sts
                    .iter()
                    .map(|st| Trace::new(st.to_vec(), Vec::new(), ""))
                    .collect();
                (slot, ts)
            })
            .collect();

        let invalid_vars = if self.config.disable_sketch_pruning {
            IndexSet::new()
        } else {
            match self.phantom_eval(
                &initial_mvs,
                &mvs_closure,
                &mut sketch,
                traces,
                &mut trace_specs,
                stats,
            ) {
                Some(vars) => vars,
                None => {
                    debug!("sketch failed phantom evaluation");
                    return Ok(None);
                }
            }
        };

        if self.config.disable_decomposition {
            return self.complete_whole(
                sketch,
                traces,
                &initial_mvs,
                &mvs_closure,
                &invalid_vars,
                overall_deadline,
                model,
                stats,
            );
        }

        // Narrow every slot to its relevant variables; a slot left with no
        // content is not a slot anymore.
        for (slot, slot_traces) in trace_specs.iter_mut() {
            let relevant: IndexSet<String> = min_vars_map
                .get(slot)
                .into_iter()
                .flatten()
                .chain(mvs_closure.iter())
                .filter(|v| !invalid_vars.contains(*v))
                .cloned()
                .collect();
            *slot_traces = slot_traces
                .iter()
                .filter_map(|t| t.minimized(&relevant, self.facts, true, false))
                .collect();
        }
        trace_specs.retain(|_, ts| !ts.is_empty());

        if !sketch.reduce(|id| trace_specs.contains_key(&id)) {
            debug!("sketch reduced to nothing");
            return Ok(None);
        }

        // Synthesize each surviving slot on its own.
        let mut pruner = TracePruner::new(self.facts);
        let mut slot_solutions: Vec<(NodeId, Vec<(Vec<String>, Program)>)> = Vec::new();
        for (&slot, slot_traces) in &trace_specs {
            let pool = TerminalPool::from_stmts(
                slot_traces
                    .iter()
                    .flat_map(|t| t.sources())
                    .filter(|s| s.kind == SourceKind::Statement)
                    .map(|s| s.src.clone()),
            );
            let search = EnumerativeSearch {
                facts: self.facts,
                pool: &pool,
                traces: slot_traces,
                return_on_first: false,
                allow_return: false,
                overall_deadline: Some(overall_deadline),
                slot_deadline: Some(Instant::now() + self.config.synthesis_timeout),
            };
            let active_pruner = (!self.config.disable_trace_pruning).then_some(&mut pruner);
            let mut outcome = search.run(
                Program::new(Nonterminal::P),
                model,
                active_pruner,
                stats,
            )?;

            // A slot that timed out still has its literal sub-trace
            // statements as a (last-resort) fill.
            if outcome.timed_out {
                let codes: Vec<String> = slot_traces
                    .first()
                    .map(|t| t.sources().map(|s| s.src.clone()).collect())
                    .unwrap_or_default();
                let mut fallback = Program::new(Nonterminal::Stmt);
                fallback.expand(
                    fallback.leftmost_unknown().expect("fresh hole"),
                    restitch_core::ProdKind::Phantom,
                    Some(Payload::Stmts(codes)),
                );
                let mut key: Vec<String> = invalid_vars.iter().cloned().collect();
                key.sort();
                outcome.solutions.entry(key).or_insert(fallback);
            }

            if outcome.solutions.is_empty() {
                debug!("slot {slot} has no solution");
                return Ok(None);
            }

            let mut admissible: Vec<(Vec<String>, Program)> = outcome
                .solutions
                .into_iter()
                .filter(|(vars, _)| vars.iter().all(|v| !initial_mvs.contains(v)))
                .collect();
            if admissible.is_empty() {
                return Ok(None);
            }
            admissible.sort_by_key(|(vars, _)| vars.len());
            slot_solutions.push((slot, admissible));
        }

        // Stitch: try every combination of per-slot programs, smallest
        // pruned sets first, until one passes end to end. A sketch whose
        // slots all emptied still gets one (trivial) combination.
        let checker = EquivalenceChecker::new(self.facts);
        let combos: Box<dyn Iterator<Item = Vec<&(Vec<String>, Program)>>> =
            if slot_solutions.is_empty() {
                Box::new(std::iter::once(Vec::new()))
            } else {
                Box::new(
                    slot_solutions
                        .iter()
                        .map(|(_, sols)| sols.iter())
                        .multi_cartesian_product(),
                )
            };
        for combo in combos {
            let mut completed = sketch.prog.clone();
            let mut pruned: IndexSet<String> = invalid_vars.clone();
            for ((slot, _), (vars, prog)) in slot_solutions.iter().zip(&combo) {
                completed.graft(*slot, prog);
                pruned.extend(vars.iter().cloned());
            }

            let mut current: IndexSet<String> = initial_mvs
                .iter()
                .chain(mvs_closure.iter())
                .filter(|v| !pruned.contains(*v))
                .cloned()
                .collect();
            current.insert("tmp".to_owned());

            let Some(mvs_traces) = minimize_all(traces, &current, self.facts) else {
                continue;
            };
            if !mvs_traces.iter().all(Trace::is_consistent) {
                continue;
            }
            if prestates_diverge(&mvs_traces, traces, &current) {
                info!("pruned trace pre-states diverge from the originals");
                continue;
            }
            if checker.check_eq(&completed, &mvs_traces) {
                debug!("completed program:\n{}", format_c(&completed));
                return Ok(Some(completed));
            }
        }
        Ok(None)
    }

    /// Whole-sketch synthesis (decomposition ablated): one enumerative
    /// search over the sketch with all its slots open at once.
    #[allow(clippy::too_many_arguments)]
    fn complete_whole(
        &self,
        sketch: ControlFlowSketch,
        traces: &[Trace],
        initial_mvs: &IndexSet<String>,
        mvs_closure: &IndexSet<String>,
        invalid_vars: &IndexSet<String>,
        overall_deadline: Instant,
        model: &mut dyn SearchModel,
        stats: &mut SearchStats,
    ) -> Result<Option<Program>> {
        let current: IndexSet<String> = initial_mvs
            .iter()
            .chain(mvs_closure.iter())
            .filter(|v| !invalid_vars.contains(*v))
            .cloned()
            .collect();
        let Some(mvs_traces) = minimize_all(traces, &current, self.facts) else {
            return Ok(None);
        };
        if prestates_diverge(&mvs_traces, traces, &current) {
            return Ok(None);
        }

        let pool = TerminalPool::from_stmts(
            mvs_traces
                .iter()
                .flat_map(|t| t.sources())
                .filter(|s| s.kind == SourceKind::Statement)
                .map(|s| s.src.clone()),
        );
        let mut pruner = TracePruner::new(self.facts);
        let search = EnumerativeSearch {
            facts: self.facts,
            pool: &pool,
            traces: &mvs_traces,
            return_on_first: true,
            allow_return: true,
            overall_deadline: Some(overall_deadline),
            slot_deadline: Some(Instant::now() + self.config.synthesis_timeout),
        };
        let active_pruner = (!self.config.disable_trace_pruning).then_some(&mut pruner);
        let outcome = search.run(sketch.prog, model, active_pruner, stats)?;

        let best = outcome
            .solutions
            .into_iter()
            .filter(|(vars, _)| vars.iter().all(|v| !initial_mvs.contains(v)))
            .min_by_key(|(vars, _)| vars.len());
        Ok(best.map(|(_, prog)| prog))
    }

    /// Cheap feasibility test for a complete sketch: stand every slot in
    /// with its raw sub-trace statements and interpret the whole thing. The
    /// variables that had to be pruned are exactly the dead-code artifacts;
    /// if one of them is a *required* variable, the sketch can never work.
    ///
    /// On success, slots in `trace_specs` are narrowed to the surviving
    /// variable set and emptied slots are dropped.
    fn phantom_eval(
        &self,
        initial_mvs: &IndexSet<String>,
        mvs_closure: &IndexSet<String>,
        sketch: &mut ControlFlowSketch,
        traces: &[Trace],
        trace_specs: &mut IndexMap<NodeId, Vec<Trace>>,
        stats: &mut SearchStats,
    ) -> Option<IndexSet<String>> {
        let mut discarded: IndexSet<String> = IndexSet::new();
        let full: IndexSet<String> = initial_mvs.iter().chain(mvs_closure.iter()).cloned().collect();

        for slot_traces in trace_specs.values() {
            for t in slot_traces {
                discarded.extend(t.inconsistent_vars());
            }
            let keep: IndexSet<String> =
                full.iter().filter(|v| !discarded.contains(*v)).cloned().collect();
            for t in slot_traces {
                if let Some(min) = t.minimized(&keep, self.facts, true, true) {
                    if !min.is_consistent() {
                        discarded.extend(min.inconsistent_vars());
                    }
                }
            }
        }
        if discarded.iter().any(|v| initial_mvs.contains(v)) {
            return None;
        }

        let mut final_vars: IndexSet<String> =
            full.iter().filter(|v| !discarded.contains(*v)).cloned().collect();
        final_vars.insert("tmp".to_owned());

        // Swap every slot for a stand-in holding its narrowed statements.
        let slots: Vec<NodeId> = trace_specs.keys().copied().collect();
        for &slot in &slots {
            let narrowed: Vec<Trace> = trace_specs[&slot]
                .iter()
                .filter_map(|t| t.minimized(&final_vars, self.facts, true, true))
                .collect();
            let codes: Vec<String> = narrowed
                .first()
                .map(|t| t.sources().map(|s| s.src.clone()).collect())
                .unwrap_or_default();
            trace_specs[&slot] = narrowed;
            sketch.prog.set_node(
                slot,
                Node::Value {
                    kind: restitch_core::ProdKind::Phantom,
                    payload: Some(Payload::Stmts(codes)),
                },
            );
        }
        trace_specs.retain(|_, ts| !ts.is_empty());

        let checker = EquivalenceChecker::new(self.facts);
        let result = minimize_all(traces, &final_vars, self.facts)
            .and_then(|mvs_traces| checker.check_eq_pruning(&sketch.prog, &mvs_traces));

        // Put the holes back whatever the verdict.
        for &slot in &slots {
            sketch.prog.set_node(
                slot,
                Node::Unknown {
                    nonterm: Nonterminal::P,
                },
            );
        }

        let Some(pruned) = result else {
            stats.phantom_pruned_sketches += 1;
            return None;
        };
        if pruned
            .iter()
            .chain(discarded.iter())
            .any(|v| initial_mvs.contains(v))
        {
            return None;
        }
        discarded.extend(pruned);
        Some(discarded)
    }
}

/// Minimize every trace to `vars`; `None` when any trace vanishes entirely.
fn minimize_all(
    traces: &[Trace],
    vars: &IndexSet<String>,
    facts: &VarFacts,
) -> Option<Vec<Trace>> {
    traces
        .iter()
        .map(|t| t.minimized(vars, facts, true, true))
        .collect()
}

/// Does any surviving variable start with a different value in the
/// projected trace than in the original?
fn prestates_diverge(minimized: &[Trace], originals: &[Trace], vars: &IndexSet<String>) -> bool {
    vars.iter().any(|v| {
        minimized.iter().zip(originals).any(|(m, t)| {
            match (m.items.first(), t.items.first()) {
                (Some(mi), Some(ti)) => match (mi.pre_state.get(v), ti.pre_state.get(v)) {
                    (Some(a), Some(b)) => a != b,
                    _ => false,
                },
                _ => false,
            }
        })
    })
}
