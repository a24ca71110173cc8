//! Control-flow sketches: programs with holes plus the sub-traces each hole
//! must explain.

mod enumerator;
mod rules;
mod structural;


pub use enumerator::SketchEnumerator;
pub use structural::{StructuralSketches, structural_sketches};

use indexmap::{IndexMap, IndexSet};

use restitch_core::grammar::ProdKind;
use restitch_core::program::{Node, NodeId, Program};
use restitch_core::source::{SourceKind, TraceSource, statement_is_return};
use restitch_core::trace::{Subtrace, TraceItem};

/// Guards of a sub-trace, projected down to text for cross-trace comparison.
pub fn subtrace_guards(st: &[TraceItem]) -> Vec<TraceSource> {
    st.iter()
        .filter(|item| item.source.kind == SourceKind::Guard)
        .map(|item| item.source.without_line_and_val())
        .collect()
}

/// Statement items of a sub-trace.
pub fn subtrace_statements(st: &[TraceItem]) -> impl Iterator<Item = &TraceItem> {
    st.iter()
        .filter(|item| item.source.kind == SourceKind::Statement)
}

/// Source-text set of a sub-trace, guards and statements alike.
pub fn subtrace_source_texts(st: &[TraceItem]) -> IndexSet<&str> {
    st.iter().map(|item| item.source.src.as_str()).collect()
}

/// A partial structured program together with the sub-traces its holes still
/// have to explain.
///
/// `trace_map` entries are *structural* holes: the enumerator keeps
/// decomposing them. `stmt_map` entries are *statement* holes: their shape is
/// settled and only a statement sequence remains to be synthesized. A hole is
/// keyed in at most one of the two.
#[derive(Debug, Clone)]
pub struct ControlFlowSketch {
    pub prog: Program,
    pub trace_map: IndexMap<NodeId, Vec<Subtrace>>,
    pub stmt_map: IndexMap<NodeId, Vec<Subtrace>>,
    /// Must every control-flow path end in a `return`?
    pub has_return_value: bool,
}

impl ControlFlowSketch {
    /// Build a sketch, dropping empty map entries.
    pub fn new(
        prog: Program,
        trace_map: IndexMap<NodeId, Vec<Subtrace>>,
        stmt_map: IndexMap<NodeId, Vec<Subtrace>>,
        has_return_value: bool,
    ) -> Self {
        Self {
            prog,
            trace_map: trace_map.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
            stmt_map: stmt_map.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
            has_return_value,
        }
    }

    /// Initial sketch: one hole owning all the traces.
    pub fn initial(traces: Vec<Subtrace>, has_return_value: bool) -> Self {
        let prog = Program::new(restitch_core::Nonterminal::P);
        let root = prog.root();
        let mut trace_map = IndexMap::new();
        trace_map.insert(root, traces);
        Self::new(prog, trace_map, IndexMap::new(), has_return_value)
    }

    /// A sketch is complete when its program has no open holes. A complete
    /// program with traces left to explain is a bug in the enumerator.
    pub fn is_complete(&self) -> bool {
        let complete = self.prog.is_complete();
        assert!(
            !(complete && !self.trace_map.is_empty()),
            "complete sketch with unexplained traces"
        );
        complete
    }

    /// Every guard text placed in the sketch so far.
    pub fn used_guards(&self) -> IndexSet<String> {
        let mut guards = IndexSet::new();
        for id in self.prog.iter_ids() {
            if let Some(spec) = self.prog.node(id).guard_spec() {
                guards.extend(spec.guards.iter().cloned());
            }
        }
        guards
    }

    /// Worklist admission test. Every structural hole needs a non-empty
    /// intersection of source texts across its sub-traces, and a
    /// return-valued function needs a `return` on every path.
    pub fn is_feasible(&self) -> bool {
        for traces in self.trace_map.values() {
            debug_assert!(!traces.is_empty(), "empty trace entry for a hole");
            let mut common: Option<IndexSet<&str>> = None;
            for st in traces {
                let texts = subtrace_source_texts(st);
                common = Some(match common {
                    None => texts,
                    Some(prev) => prev.intersection(&texts).copied().collect(),
                });
            }
            if common.is_none_or(|c| c.is_empty()) {
                return false;
            }
        }
        if self.has_return_value && !self.returns_on_all_paths(self.prog.root(), true) {
            return false;
        }
        true
    }

    /// Does every path through the subtree at `id` end in a `return`?
    ///
    /// `strict` demands a return on *every* path; loops and one-armed `if`s
    /// weaken it, since their bodies may not run.
    pub fn returns_on_all_paths(&self, id: NodeId, strict: bool) -> bool {
        match self.prog.node(id) {
            Node::Value { kind, .. } => match kind {
                ProdKind::Seq => {
                    let cs = self.prog.children(id);
                    self.returns_on_all_paths(cs[0], strict)
                        || self.returns_on_all_paths(cs[1], strict)
                }
                ProdKind::Ite => {
                    let cs = self.prog.children(id);
                    self.returns_on_all_paths(cs[1], strict)
                        && self.returns_on_all_paths(cs[2], strict)
                }
                ProdKind::If => {
                    if strict {
                        false
                    } else {
                        self.returns_on_all_paths(self.prog.children(id)[1], strict)
                    }
                }
                ProdKind::While => self.returns_on_all_paths(self.prog.children(id)[1], false),
                _ => self
                    .prog
                    .children(id)
                    .iter()
                    .all(|&c| self.returns_on_all_paths(c, strict)),
            },
            Node::Unknown { .. } => {
                if let Some(traces) = self.stmt_map.get(&id) {
                    let ends_in_return = |st: &Subtrace| {
                        st.last()
                            .is_some_and(|item| statement_is_return(&item.source.src))
                    };
                    if strict {
                        traces.iter().all(ends_in_return)
                    } else {
                        traces.iter().any(ends_in_return)
                    }
                } else if let Some(traces) = self.trace_map.get(&id) {
                    let contains_return = |st: &Subtrace| {
                        st.iter().any(|item| statement_is_return(&item.source.src))
                    };
                    if strict {
                        traces.iter().all(contains_return)
                    } else {
                        traces.iter().any(contains_return)
                    }
                } else {
                    false
                }
            }
        }
    }

    /// Turn every implicit statement hole into a real open hole.
    ///
    /// Unknown nodes parked in `stmt_map` are re-registered; `Value` nodes
    /// keyed there (the roots of rule-built subprograms) get a `Seq(?, node)`
    /// wrapper so the statement slot in front of them is expandable.
    pub fn make_explicit(&mut self) {
        for id in self.prog.unknown_nodes() {
            self.prog.register_unknown(id);
        }
        let keys: Vec<NodeId> = self.stmt_map.keys().copied().collect();
        for key in keys {
            if self.prog.node(key).is_unknown() {
                continue;
            }
            let hole = self.prog.wrap_in_seq(key);
            let traces = self.stmt_map.shift_remove(&key).expect("key just listed");
            self.stmt_map.insert(hole, traces);
        }
    }

    /// Structurally reduce the program, dropping holes `keep` rejects:
    /// collapse emptied `Seq`s, demote `ITE` to `If` when a branch died,
    /// delete `If`/`While` whose body died. Returns false when the whole
    /// program reduces away.
    pub fn reduce(&mut self, keep: impl Fn(NodeId) -> bool) -> bool {
        let root = self.prog.root();
        match reduce_node(&mut self.prog, root, &keep) {
            None => false,
            Some(new_root) => {
                if new_root != root {
                    self.prog.replace(root, new_root);
                }
                true
            }
        }
    }
}

fn reduce_node(
    prog: &mut Program,
    id: NodeId,
    keep: &impl Fn(NodeId) -> bool,
) -> Option<NodeId> {
    let kind = match prog.node(id) {
        Node::Unknown { .. } => return keep(id).then_some(id),
        Node::Value { kind, .. } => *kind,
    };
    match kind {
        ProdKind::Seq => {
            let (c1, c2) = {
                let cs = prog.children(id);
                (cs[0], cs[1])
            };
            let r1 = reduce_node(prog, c1, keep);
            let r2 = reduce_node(prog, c2, keep);
            match (r1, r2) {
                (None, None) => None,
                (None, Some(c)) | (Some(c), None) => Some(c),
                (Some(a), Some(b)) => {
                    if a != c1 {
                        prog.replace(c1, a);
                    }
                    if b != c2 {
                        prog.replace(c2, b);
                    }
                    Some(id)
                }
            }
        }
        ProdKind::Ite => {
            let (then_c, else_c) = {
                let cs = prog.children(id);
                (cs[1], cs[2])
            };
            let rt = reduce_node(prog, then_c, keep);
            let re = reduce_node(prog, else_c, keep);
            match (rt, re) {
                (None, None) => None,
                (None, Some(e)) => {
                    if e != else_c {
                        prog.replace(else_c, e);
                    }
                    prog.set_node(
                        id,
                        Node::Value {
                            kind: ProdKind::If,
                            payload: None,
                        },
                    );
                    prog.remove_subtree(then_c);
                    Some(id)
                }
                (Some(t), None) => {
                    if t != then_c {
                        prog.replace(then_c, t);
                    }
                    prog.set_node(
                        id,
                        Node::Value {
                            kind: ProdKind::If,
                            payload: None,
                        },
                    );
                    prog.remove_subtree(else_c);
                    Some(id)
                }
                (Some(t), Some(e)) => {
                    if t != then_c {
                        prog.replace(then_c, t);
                    }
                    if e != else_c {
                        prog.replace(else_c, e);
                    }
                    Some(id)
                }
            }
        }
        ProdKind::If | ProdKind::While => {
            let body = prog.children(id)[1];
            let rb = reduce_node(prog, body, keep)?;
            if rb != body {
                prog.replace(body, rb);
            }
            Some(id)
        }
        _ => Some(id),
    }
}
