//! Variable requirements of a sketch.
//!
//! The completer narrows traces to the variables that can matter. The floor
//! is the *minimum* set: whatever the sketch's guards read plus whatever the
//! traces return. The ceiling is that set's *dependency closure* over the
//! statements reachable from any slot.

use indexmap::{IndexMap, IndexSet};

use restitch_core::NodeId;
use restitch_core::trace::Trace;
use restitch_core::VarFacts;

use crate::sketch::ControlFlowSketch;

/// Per-slot minimum variable sets: the variables of every guard placed in
/// the sketch, plus the variables of each trace's final (return) statement.
/// Every slot shares the requirement; a guard anywhere constrains the
/// states every slot must reproduce.
pub fn min_vars(
    sketch: &ControlFlowSketch,
    traces: &[Trace],
    facts: &VarFacts,
) -> IndexMap<NodeId, IndexSet<String>> {
    let mut needed: IndexSet<String> = IndexSet::new();
    for trace in traces {
        if let Some(last) = trace.items.last() {
            needed.extend(facts.used(&last.source.src).iter().cloned());
        }
    }
    for id in sketch.prog.iter_ids() {
        if let Some(spec) = sketch.prog.node(id).guard_spec() {
            for g in &spec.guards {
                needed.extend(facts.used(g).iter().cloned());
            }
        }
    }

    sketch
        .prog
        .unknowns()
        .iter()
        .map(|&unk| (unk, needed.clone()))
        .collect()
}

/// Fixed-point dependency closure of `initial` over the statements in the
/// sketch's slots: whenever a statement touches a variable already in the
/// working set, its used and declared variables join the set. Bounded by
/// `depth` rounds.
pub fn dependency_closure(
    sketch: &ControlFlowSketch,
    facts: &VarFacts,
    initial: &IndexSet<String>,
    depth: usize,
) -> IndexSet<String> {
    let all_stmts: IndexSet<&str> = sketch
        .stmt_map
        .values()
        .flatten()
        .flat_map(|st| st.iter())
        .map(|item| item.source.src.as_str())
        .collect();

    let mut closed = initial.clone();
    for _ in 0..depth {
        let mut added: IndexSet<String> = IndexSet::new();
        for &stmt in &all_stmts {
            let touches = facts.used(stmt).iter().any(|v| closed.contains(v))
                || facts
                    .declared_names(stmt)
                    .iter()
                    .any(|v| closed.contains(*v));
            if !touches {
                continue;
            }
            for v in facts.used(stmt) {
                if !closed.contains(v) {
                    added.insert(v.clone());
                }
            }
            for v in facts.declared_names(stmt) {
                if !closed.contains(v) {
                    added.insert(v.to_owned());
                }
            }
        }
        if added.is_empty() {
            break;
        }
        closed.extend(added);
    }
    closed
}
