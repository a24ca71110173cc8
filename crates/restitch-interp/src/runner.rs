//! Small-step execution of a program tree against a recorded trace.
//!
//! The runner walks the program and advances an index into the trace. Each
//! leaf looks forward for the first trace item whose source text matches and
//! whose pre-state agrees with the carried state on live variables; on a
//! match the carried state is rebound to the item's post-state. Control flow
//! branches on the truth values the trace recorded, so the walk never
//! evaluates an expression itself.

use indexmap::{IndexMap, IndexSet};

use restitch_core::grammar::ProdKind;
use restitch_core::guard::GuardComposition;
use restitch_core::program::{Node, NodeId, Payload, Program};
use restitch_core::source::{SourceKind, statement_is_break, statement_is_return};
use restitch_core::trace::{TraceItem, VarState};
use restitch_core::VarFacts;

use crate::signal::ExecSignal;

/// Mutable execution state threaded through the walk.
#[derive(Debug, Clone)]
pub struct RunnerState {
    /// Carried variable valuation.
    pub state: VarState,
    /// Index of the last matched trace item; -1 before the first match.
    pub trace_index: isize,
    /// Truth value of the most recently executed guard.
    pub guard_result: Option<bool>,
    /// Set by an executed `break;`, consumed by the enclosing `While`.
    pub loop_break: bool,
    /// Variables ignored after diverging in dead code.
    pub pruned: IndexSet<String>,
    /// Whether divergence may grow `pruned` instead of failing the match.
    pub allow_pruning: bool,
}

impl RunnerState {
    pub fn new(initial: VarState, allow_pruning: bool) -> Self {
        Self {
            state: initial,
            trace_index: -1,
            guard_result: None,
            loop_break: false,
            pruned: IndexSet::new(),
            allow_pruning,
        }
    }
}

/// Outcome of running a program against one trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// No dead end was hit; partial programs can still be extended.
    pub safe: bool,
    /// The program explained the whole trace, final states agreeing.
    pub complete: bool,
    /// Variables pruned as dead-code artifacts along the way.
    pub pruned: IndexSet<String>,
}

/// Trace interpreter. Borrows the per-line variable facts; owns nothing.
pub struct TraceRunner<'a> {
    facts: &'a VarFacts,
}

impl<'a> TraceRunner<'a> {
    pub fn new(facts: &'a VarFacts) -> Self {
        Self { facts }
    }

    /// Run `prog` against `items` and fold the stop signal into a verdict.
    pub fn run_check(
        &self,
        prog: &Program,
        items: &[TraceItem],
        allow_pruning: bool,
        allow_unknown: bool,
    ) -> Verdict {
        let Some(first) = items.first() else {
            return Verdict {
                safe: true,
                complete: false,
                pruned: IndexSet::new(),
            };
        };
        let mut state = RunnerState::new(first.pre_state.clone(), allow_pruning);
        let result = self.execute_node(prog, items, prog.root(), &mut state, allow_unknown);

        let (safe, complete) = match result {
            Ok(()) => {
                let last = items.last().expect("non-empty trace");
                let agrees = last
                    .post_state
                    .keys()
                    .filter(|k| !state.pruned.contains(k.as_str()))
                    .all(|k| last.post_state.get(k) == state.state.get(k));
                let complete = agrees
                    && state.trace_index >= 0
                    && !statement_is_return(&last.source.src);
                (true, complete)
            }
            Err(ExecSignal::TraceIdxNotFound) => (false, false),
            Err(ExecSignal::UnknownEncounter) => (true, false),
            Err(ExecSignal::TraceEnd) => (true, true),
        };
        Verdict {
            safe,
            complete,
            pruned: state.pruned,
        }
    }

    /// Whether a *partial* program is still consistent with the trace: safe
    /// and not yet complete.
    pub fn partial_ok(&self, prog: &Program, items: &[TraceItem], allow_pruning: bool) -> bool {
        let verdict = self.run_check(prog, items, allow_pruning, false);
        verdict.safe && !verdict.complete
    }

    /// Execute one node, advancing the trace index. Signals are control
    /// flow; see [`ExecSignal`].
    pub fn execute_node(
        &self,
        prog: &Program,
        items: &[TraceItem],
        id: NodeId,
        state: &mut RunnerState,
        allow_unknown: bool,
    ) -> Result<(), ExecSignal> {
        let node = prog.node(id);
        match node {
            Node::Unknown { .. } => {
                if allow_unknown {
                    Ok(())
                } else {
                    Err(ExecSignal::UnknownEncounter)
                }
            }
            Node::Value { kind, payload } => match (kind, payload) {
                (ProdKind::Single | ProdKind::Stmt, None) => {
                    self.execute_node(prog, items, prog.children(id)[0], state, allow_unknown)
                }
                (ProdKind::Seq, None) => {
                    self.execute_node(prog, items, prog.children(id)[0], state, allow_unknown)?;
                    self.execute_node(prog, items, prog.children(id)[1], state, allow_unknown)
                }
                (ProdKind::If, None) => {
                    let &[guard, body] = prog.children(id) else {
                        unreachable!("If arity");
                    };
                    self.execute_node(prog, items, guard, state, allow_unknown)?;
                    if state.guard_result == Some(true) {
                        self.execute_node(prog, items, body, state, allow_unknown)?;
                    }
                    Ok(())
                }
                (ProdKind::Ite, None) => {
                    let &[guard, then_p, else_p] = prog.children(id) else {
                        unreachable!("ITE arity");
                    };
                    self.execute_node(prog, items, guard, state, allow_unknown)?;
                    let branch = if state.guard_result == Some(true) {
                        then_p
                    } else {
                        else_p
                    };
                    self.execute_node(prog, items, branch, state, allow_unknown)
                }
                (ProdKind::While, None) => {
                    let &[guard, body] = prog.children(id) else {
                        unreachable!("While arity");
                    };
                    self.execute_node(prog, items, guard, state, allow_unknown)?;
                    while state.guard_result == Some(true) {
                        self.execute_node(prog, items, body, state, allow_unknown)?;
                        if state.loop_break {
                            break;
                        }
                        self.execute_node(prog, items, guard, state, allow_unknown)?;
                    }
                    state.guard_result = None;
                    state.loop_break = false;
                    Ok(())
                }
                (_, Some(payload)) => self.execute_leaf(items, payload, state),
                _ => unreachable!("malformed node"),
            },
        }
    }

    fn execute_leaf(
        &self,
        items: &[TraceItem],
        payload: &Payload,
        state: &mut RunnerState,
    ) -> Result<(), ExecSignal> {
        let (codes, composition, negated): (&[String], GuardComposition, bool) = match payload {
            Payload::Guard(spec) => (&spec.guards, spec.composition, spec.negated),
            Payload::Stmt(s) => {
                (std::slice::from_ref(s), GuardComposition::None, false)
            }
            Payload::Stmts(ss) => {
                if ss.is_empty() {
                    return Ok(());
                }
                (ss, GuardComposition::None, false)
            }
        };

        let used: IndexSet<&str> = codes
            .iter()
            .flat_map(|c| self.facts.used(c).iter().map(String::as_str))
            .collect();
        let declared: IndexSet<&str> = codes
            .iter()
            .flat_map(|c| self.facts.declared_names(c))
            .collect();

        // A leaf cannot execute before every variable it reads (and does not
        // itself declare) is live and unpruned.
        if used
            .iter()
            .any(|v| !declared.contains(v) && !state.state.contains_key(*v))
            || (state.allow_pruning && used.iter().any(|v| state.pruned.contains(*v)))
        {
            return Err(ExecSignal::TraceIdxNotFound);
        }

        let mut code_idx = 0usize;
        let start = (state.trace_index + 1).max(0) as usize;
        for i in start..items.len() {
            let code = &codes[code_idx];

            if statement_is_break(code) {
                // `break; break;` can never execute.
                if state.loop_break {
                    return Err(ExecSignal::TraceIdxNotFound);
                }
                state.loop_break = true;
                // Synthetic breaks have no trace item of their own.
                if i == items.len() - 1 {
                    return Err(ExecSignal::TraceEnd);
                }
                state.trace_index = i as isize - 1;
                return Ok(());
            }

            let source = &items[i].source;
            let mut negated_here = negated;
            if source.src != *code {
                // Tigress emits `!(g)` for a flipped guard over the text `g`.
                let stripped = source
                    .src
                    .strip_prefix('!')
                    .map(|s| s.trim_matches(|c| c == '(' || c == ')' || c == ' '));
                if source.kind == SourceKind::Guard && stripped == Some(code.as_str()) {
                    negated_here = true;
                } else {
                    continue;
                }
            }

            if !self.state_matches(&items[i].pre_state, code, state, &used) {
                continue;
            }

            // The final trace item has no successor state to rebind to.
            if i == items.len() - 1 {
                return Err(ExecSignal::TraceEnd);
            }

            self.rebind_state(&items[i].post_state, codes, state);

            let mut result = source.val.unwrap_or(false);
            if negated_here {
                result = !result;
            }
            code_idx += 1;

            if code_idx == codes.len() {
                state.guard_result = Some(result);
                state.trace_index = i as isize;
                return Ok(());
            }
            // Short-circuit compound evaluation.
            if !result && composition == GuardComposition::And {
                state.guard_result = Some(false);
                state.trace_index = i as isize;
                return Ok(());
            }
            if result && composition == GuardComposition::Or {
                state.guard_result = Some(true);
                state.trace_index = i as isize;
                return Ok(());
            }
        }

        if state.trace_index == items.len() as isize - 1 {
            Err(ExecSignal::TraceEnd)
        } else {
            Err(ExecSignal::TraceIdxNotFound)
        }
    }

    /// Does the carried state agree with a candidate item's pre-state?
    ///
    /// Divergences are forgiven in two cases: the Tigress scratch `tmp` may
    /// drift unless the statement reads it without writing it, and in
    /// pruning mode any diverging variable the statement does not read is
    /// added to the pruned set and ignored from then on.
    fn state_matches(
        &self,
        before: &VarState,
        code: &str,
        state: &mut RunnerState,
        used_here: &IndexSet<&str>,
    ) -> bool {
        // Pruning is sticky: a variable pruned while probing one candidate
        // item stays pruned even if that candidate fails to match.
        let carried = std::mem::take(&mut state.state);
        let mut ok = true;
        for (var, value) in &carried {
            match before.get(var) {
                Some(b) if b == value => continue,
                Some(_)
                    if var == "tmp"
                        && (!self.facts.used(code).contains("tmp")
                            || self.facts.written(code).contains("tmp")) =>
                {
                    continue;
                }
                _ => {}
            }
            if state.allow_pruning && !used_here.contains(var.as_str()) {
                state.pruned.insert(var.clone());
            } else {
                ok = false;
                break;
            }
        }
        state.state = carried;
        ok
    }

    /// Rebind the carried state to a matched item's post-state, restricted
    /// to the previously live keys plus the leaf's declarations.
    fn rebind_state(&self, after: &VarState, codes: &[String], state: &mut RunnerState) {
        let mut keys: IndexSet<String> = state
            .state
            .keys()
            .filter(|k| after.contains_key(*k))
            .cloned()
            .collect();
        for code in codes {
            keys.extend(
                self.facts
                    .declared_names(code)
                    .into_iter()
                    .map(str::to_owned),
            );
        }
        state.state = keys
            .into_iter()
            .filter_map(|k| {
                let v = after.get(&k)?.clone();
                Some((k, v))
            })
            .collect::<IndexMap<_, _>>();
    }
}
