//! Structural decomposition rules.
//!
//! Each rule inspects the sub-traces at a hole together with one guard (or
//! an ordered pair of guards) and, when the trace shapes justify it,
//! proposes subprograms plus the sub-traces each fresh hole must explain.
//! Polarity-swapped variants reuse the same code with `swap` set.

use indexmap::{IndexMap, IndexSet};

use restitch_core::grammar::{Nonterminal, ProdKind};
use restitch_core::guard::{GuardComposition, GuardSpec};
use restitch_core::program::{NodeId, Payload, Program};
use restitch_core::source::{
    SourceKind, TraceSource, statement_has_control_flow, statement_is_return,
};
use restitch_core::trace::{Subtrace, TraceItem};
use restitch_core::VarFacts;

/// Stand-in variable for statements that use none; lets one var-less
/// statement per kind survive anchor covering.
const NO_VARS: &str = "@@no_vars@@";

/// A proposed expansion: the subprogram to graft plus the sub-traces for
/// each of its holes (keyed by subprogram-local node ids).
#[derive(Debug, Clone)]
pub(crate) struct Decomposition {
    pub subprog: Program,
    pub trace_map: IndexMap<NodeId, Vec<Subtrace>>,
}

/// Shared context for all rules.
pub(crate) struct RuleCtx<'a> {
    pub facts: &'a VarFacts,
}

impl<'a> RuleCtx<'a> {
    pub fn new(facts: &'a VarFacts) -> Self {
        Self { facts }
    }

    // ------------------------------------------------------------------
    // If / ITE
    // ------------------------------------------------------------------

    /// `If`/`ITE` decomposition: applicable when each sub-trace observes the
    /// guard with exactly one polarity, true at most once.
    pub fn ite(&self, guard: &TraceSource, traces: &[Subtrace]) -> Vec<Decomposition> {
        let true_guard = guard.clone().with_val(true);
        let false_guard = guard.clone().with_val(false);

        for st in traces {
            let t = st.iter().filter(|x| x.source.matches(&true_guard)).count();
            let f = st.iter().filter(|x| x.source.matches(&false_guard)).count();
            if (t > 0 && f > 0) || t > 1 || (t == 0 && f == 0) {
                return Vec::new();
            }
        }

        // Candidate anchors: sources common to all traces after the guard,
        // in first-trace order.
        let mut candidates: Option<Vec<TraceSource>> = None;
        for st in traces {
            let after = sources_after(st, guard);
            candidates = Some(match candidates {
                None => after,
                Some(prev) => prev
                    .into_iter()
                    .filter(|x| after.iter().any(|y| y.matches(x)))
                    .collect(),
            });
        }
        let mut anchors: Vec<Option<TraceSource>> = self
            .reduce_anchors(candidates.unwrap_or_default())
            .into_iter()
            .map(Some)
            .collect();
        anchors.push(None);

        let mut out = Vec::new();
        'anchors: for anchor_entry in anchors {
            let anchor = anchor_entry.as_ref().map(|a| a.without_line_and_val());

            let mut body_traces: Vec<Subtrace> = Vec::new();
            let mut else_traces: Vec<Subtrace> = Vec::new();
            let mut subsequent_traces: Vec<Subtrace> = Vec::new();
            for st in traces {
                // Work backward: split off the tail at the anchor first.
                let scope: &[TraceItem] = match &anchor {
                    None => &st[..],
                    Some(anchor) => {
                        let Some(last) = last_match(st, anchor) else {
                            // The anchor text can reoccur before the guard;
                            // the backward split is meaningless then.
                            continue 'anchors;
                        };
                        // The continuation starts at the final run of anchor
                        // occurrences and carries everything after it.
                        let (run_start, _) = anchor_run(st, last, anchor);
                        subsequent_traces.push(Subtrace::from(&st[run_start..]));
                        &st[..last]
                    }
                };

                if let Some(pos) = scope.iter().position(|x| x.source.matches(&true_guard)) {
                    if pos + 1 < scope.len() {
                        body_traces.push(Subtrace::from(&scope[pos + 1..]));
                    }
                } else if let Some(pos) =
                    scope.iter().position(|x| x.source.matches(&false_guard))
                {
                    if pos + 1 < scope.len() {
                        else_traces.push(Subtrace::from(&scope[pos + 1..]));
                    }
                } else {
                    continue 'anchors;
                }
            }

            if body_traces.is_empty() {
                continue;
            }

            // `if (C) { ...; return; } else { ... }` flattens to
            // `if (C) { ...; return; } ...`.
            if subsequent_traces.is_empty()
                && !else_traces.is_empty()
                && body_traces.iter().all(|st| {
                    st.last()
                        .is_some_and(|item| statement_is_return(&item.source.src))
                })
            {
                subsequent_traces = std::mem::take(&mut else_traces);
            }

            let mut trace_map = IndexMap::new();
            let mut subprog = Program::new(Nonterminal::P);
            let mut current = subprog.leftmost_unknown().expect("fresh hole");

            if !subsequent_traces.is_empty() && !branch_likely_bogus(&subsequent_traces) {
                subprog.expand(current, ProdKind::Seq, None);
                let unks = subprog.unknowns().to_vec();
                current = unks[0];
                trace_map.insert(unks[1], subsequent_traces);
            }

            if !else_traces.is_empty() && !branch_likely_bogus(&else_traces) {
                subprog.expand(current, ProdKind::Ite, None);
                let guard_hole = subprog.leftmost_unknown().expect("guard hole");
                subprog.expand(
                    guard_hole,
                    ProdKind::SourceGuard,
                    Some(Payload::Guard(GuardSpec::single(guard.src.clone(), false))),
                );
                let unks = subprog.unknowns().to_vec();
                let (body_hole, else_hole) = (unks[unks.len() - 2], unks[unks.len() - 1]);
                trace_map.insert(body_hole, body_traces);
                trace_map.insert(else_hole, else_traces);
            } else {
                subprog.expand(current, ProdKind::If, None);
                let guard_hole = subprog.leftmost_unknown().expect("guard hole");
                subprog.expand(
                    guard_hole,
                    ProdKind::SourceGuard,
                    Some(Payload::Guard(GuardSpec::single(guard.src.clone(), false))),
                );
                let unks = subprog.unknowns().to_vec();
                trace_map.insert(unks[unks.len() - 1], body_traces);
            }
            out.push(Decomposition { subprog, trace_map });
        }
        out
    }

    // ------------------------------------------------------------------
    // While, single guard
    // ------------------------------------------------------------------

    /// Single-guard `While` decomposition. `swap` flips which observation
    /// counts as entering the loop.
    pub fn while_single(
        &self,
        guard: &TraceSource,
        traces: &[Subtrace],
        swap: bool,
    ) -> Vec<Decomposition> {
        let true_guard = guard.clone().with_val(!swap);
        let false_guard = guard.clone().with_val(swap);

        // Basic loop: every trace sees the exit observation or returns out.
        let is_basic_loop = traces.iter().all(|st| {
            st.iter().any(|x| x.source.matches(&false_guard))
                || st
                    .last()
                    .is_some_and(|item| statement_is_return(&item.source.src))
        });

        // Some trace must actually iterate: twice true with no exit, or true
        // at least once before the exit.
        let iterates = traces.iter().any(|st| {
            let exit = st.iter().position(|x| x.source.matches(&false_guard));
            match exit {
                None => st.iter().filter(|x| x.source.matches(&true_guard)).count() >= 2,
                Some(exit) => st[..exit]
                    .iter()
                    .any(|x| x.source.matches(&true_guard)),
            }
        });
        if !iterates {
            return Vec::new();
        }

        // Anchor candidates: sources common to every exiting trace after the
        // exit observation.
        let after_exit: Vec<Vec<TraceSource>> = traces
            .iter()
            .filter(|st| st.iter().any(|x| x.source.matches(&false_guard)))
            .map(|st| sources_after(st, &false_guard))
            .collect();
        let mut anchors = sequence_intersection(&after_exit);
        if is_basic_loop && !anchors.iter().any(|a| a.matches(&false_guard)) {
            // Re-testing the guard right after exit would mean consecutive
            // loops over the same guard; outside that case the exit
            // observation itself is the only anchor worth trying.
            anchors = vec![false_guard.clone()];
        }
        let mut anchors: Vec<Option<TraceSource>> =
            self.reduce_anchors(anchors).into_iter().map(Some).collect();
        if !is_basic_loop {
            anchors.push(None);
        }

        let mut out = Vec::new();
        for anchor_entry in anchors {
            let mut body_traces: Vec<Subtrace> = Vec::new();
            let mut subsequent_traces: Vec<Subtrace> = Vec::new();

            for st in traces {
                let anchor_in_trace = anchor_entry
                    .as_ref()
                    .is_some_and(|a| st.iter().any(|x| x.source.matches(a)));

                let mut scope: &[TraceItem] = &st[..];
                if anchor_in_trace {
                    let anchor = anchor_entry.as_ref().expect("checked above");
                    let last = last_match(st, anchor).expect("anchor occurs");
                    let (run_start, has_tail) = anchor_run(st, last, anchor);
                    let anchor_is_exit = anchor.matches(&false_guard);
                    // The continuation keeps the anchor run, except when the
                    // anchor is the exit observation itself: the guard test
                    // belongs to the loop, not to what follows it.
                    let subseq: &[TraceItem] = if has_tail && anchor_is_exit {
                        &st[last + 1..]
                    } else {
                        &st[run_start..]
                    };
                    // A trace ending at the exit observation has nothing
                    // after the loop.
                    if (has_tail || !anchor_is_exit) && !subseq.is_empty() {
                        subsequent_traces.push(Subtrace::from(subseq));
                    }
                    scope = &st[..last];
                }

                let segments = loop_body_segments(
                    scope,
                    guard,
                    &true_guard,
                    anchor_entry.as_ref().map(|a| a.matches(&false_guard)).unwrap_or(false)
                        && anchor_in_trace,
                );
                if segments.is_empty() {
                    continue;
                }
                let valid: Vec<bool> = segments
                    .iter()
                    .map(|seg| self.loop_body_is_valid(seg, std::slice::from_ref(guard)))
                    .collect();
                for (seg, ok) in segments.iter().zip(&valid) {
                    if *ok {
                        body_traces.push(Subtrace::from(seg.as_slice()));
                    }
                }
                // A final segment cut short by control flow still belongs to
                // the body even when it never writes a guard variable.
                let last_seg = segments.last().expect("non-empty");
                if !valid[valid.len() - 1]
                    && last_seg
                        .last()
                        .is_some_and(|item| statement_has_control_flow(&item.source.src))
                {
                    body_traces.push(Subtrace::from(last_seg.as_slice()));
                }
            }

            // A loop whose every iteration immediately breaks is an `if` in
            // disguise; the ITE rule owns that shape.
            if body_traces.is_empty()
                || body_traces
                    .iter()
                    .all(|st| st.last().is_some_and(|item| item.source.is_break()))
            {
                continue;
            }

            let mut subprog = Program::new(Nonterminal::P);
            if !subsequent_traces.is_empty() {
                subprog.expand(subprog.leftmost_unknown().expect("hole"), ProdKind::Seq, None);
            }
            subprog.expand(
                subprog.leftmost_unknown().expect("hole"),
                ProdKind::While,
                None,
            );
            subprog.expand(
                subprog.leftmost_unknown().expect("guard hole"),
                ProdKind::SourceGuard,
                Some(Payload::Guard(GuardSpec::single(guard.src.clone(), swap))),
            );

            let unks = subprog.unknowns().to_vec();
            let mut trace_map = IndexMap::new();
            if !subsequent_traces.is_empty() {
                trace_map.insert(unks[1], body_traces);
                trace_map.insert(unks[0], subsequent_traces);
            } else {
                trace_map.insert(unks[0], body_traces);
            }
            out.push(Decomposition { subprog, trace_map });
        }
        out
    }

    // ------------------------------------------------------------------
    // While, conjunction of guards
    // ------------------------------------------------------------------

    /// `while (G1 && ... && Gn)` decomposition. Requires some trace where,
    /// before any exit observation, every conjunct tests true more than
    /// once. Relaxed on purpose: obfuscated conjuncts often share
    /// subexpressions, so exact alternation cannot be demanded.
    pub fn while_conj(
        &self,
        guards: &[TraceSource],
        traces: &[Subtrace],
        swap: bool,
    ) -> Option<Decomposition> {
        assert!(guards.len() > 1, "conjunction needs several guards");
        let true_guards: Vec<TraceSource> =
            guards.iter().map(|g| g.clone().with_val(!swap)).collect();
        let false_guards: Vec<TraceSource> =
            guards.iter().map(|g| g.clone().with_val(swap)).collect();

        let applicable = traces.iter().any(|st| {
            let prefix_end = st
                .iter()
                .position(|x| false_guards.iter().any(|g| x.source.matches(g)))
                .unwrap_or(st.len());
            true_guards.iter().all(|g| {
                st[..prefix_end]
                    .iter()
                    .filter(|x| x.source.matches(g))
                    .count()
                    > 1
            })
        });
        if !applicable {
            return None;
        }

        let (subprog, subsequent_hole, body_hole) = compound_while_skeleton(
            guards,
            swap,
            GuardComposition::And,
        );

        let mut body_traces: Vec<Subtrace> = Vec::new();
        let mut subsequent_traces: Vec<Subtrace> = Vec::new();

        for st in traces {
            let mut segments: Vec<Vec<TraceItem>> = Vec::new();
            let mut subsequent: Vec<TraceItem> = Vec::new();
            let mut current: Vec<TraceItem> = Vec::new();
            let mut entered = false;
            let mut next_idx = 0usize;
            let mut may_exit = false;

            for item in st.iter() {
                if item.source.matches(&false_guards[next_idx]) {
                    may_exit = true;
                }
                if may_exit {
                    subsequent.push(item.clone());
                } else if item.source.matches(&true_guards[next_idx]) {
                    entered = true;
                    next_idx = (next_idx + 1) % true_guards.len();
                    if next_idx == 0 && !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                        may_exit = false;
                        subsequent.clear();
                    }
                } else if next_idx == 0 && entered {
                    current.push(item.clone());
                }
            }
            if !current.is_empty() {
                segments.push(current);
            }

            for seg in segments {
                if self.loop_body_is_valid(&seg, guards) {
                    body_traces.push(Subtrace::from(seg.as_slice()));
                }
            }
            // Drop the exit observation itself from the continuation.
            if subsequent.len() > 1 {
                subsequent_traces.push(Subtrace::from(&subsequent[1..]));
            }
        }

        let mut trace_map = IndexMap::new();
        trace_map.insert(body_hole, body_traces);
        trace_map.insert(subsequent_hole, subsequent_traces);
        Some(Decomposition { subprog, trace_map })
    }

    // ------------------------------------------------------------------
    // While, disjunction of guards
    // ------------------------------------------------------------------

    /// `while (G1 || ... || Gn)` decomposition. Every trace must end in the
    /// pattern `!G1 !G2 ... !Gn`, and within the trace each iteration must
    /// test guards in order until one is true.
    pub fn while_disj(
        &self,
        guards: &[TraceSource],
        traces: &[Subtrace],
        swap: bool,
    ) -> Option<Decomposition> {
        assert!(guards.len() > 1, "disjunction needs several guards");
        let n = guards.len();
        let true_guards: Vec<TraceSource> =
            guards.iter().map(|g| g.clone().with_val(!swap)).collect();
        let false_guards: Vec<TraceSource> =
            guards.iter().map(|g| g.clone().with_val(swap)).collect();
        let wrap = |i: isize| -> usize { i.rem_euclid(n as isize) as usize };

        for st in traces {
            // Phase one: consume the final `!G1 !G2 ... !Gn` run backwards.
            let mut guard_idx: isize = n as isize - 1;
            let mut stop = 0usize;
            for (i, item) in st.iter().rev().enumerate() {
                stop = i;
                if guard_idx < -1 {
                    return None;
                }
                if item.source.matches(&false_guards[wrap(guard_idx)]) {
                    guard_idx -= 1;
                } else if item.source.matches(&true_guards[wrap(guard_idx)]) {
                    break;
                }
            }
            if guard_idx != -1 {
                return None;
            }

            // Phase two: each earlier iteration tests guards in order until
            // the first true one.
            let mut guard_idx: isize = -1;
            let mut expect_false = false;
            for item in st[..st.len() - stop].iter().rev() {
                let Some(pos) = guards.iter().position(|g| item.source.matches(g)) else {
                    continue;
                };
                if guard_idx == -1 {
                    expect_false = false;
                    guard_idx = pos as isize;
                }
                let idx = wrap(guard_idx);
                if expect_false && item.source.matches(&false_guards[idx]) {
                    guard_idx -= 1;
                } else if !expect_false && item.source.matches(&true_guards[idx]) {
                    guard_idx -= 1;
                    expect_false = true;
                } else {
                    return None;
                }
            }
        }

        let (subprog, subsequent_hole, body_hole) =
            compound_while_skeleton(guards, swap, GuardComposition::Or);

        let mut body_traces: Vec<Subtrace> = Vec::new();
        let mut subsequent_traces: Vec<Subtrace> = Vec::new();

        for st in traces {
            let mut segments: Vec<Vec<TraceItem>> = Vec::new();
            let mut subsequent: Vec<TraceItem> = Vec::new();
            let mut current: Vec<TraceItem> = Vec::new();
            let mut entered = false;
            let mut next_idx = 0usize;
            let mut may_exit = false;

            for item in st.iter() {
                if next_idx == true_guards.len() {
                    may_exit = true;
                }
                if may_exit {
                    subsequent.push(item.clone());
                } else if item.source.matches(&false_guards[next_idx]) {
                    entered = false;
                    next_idx += 1;
                } else if item.source.matches(&true_guards[next_idx]) {
                    entered = true;
                    next_idx = 0;
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                        may_exit = false;
                        subsequent.clear();
                    }
                } else if next_idx == 0 && entered {
                    current.push(item.clone());
                }
            }
            if !current.is_empty() {
                segments.push(current);
            }

            for seg in segments {
                if self.loop_body_is_valid(&seg, guards) {
                    body_traces.push(Subtrace::from(seg.as_slice()));
                }
            }
            if !subsequent.is_empty() {
                subsequent_traces.push(Subtrace::from(subsequent.as_slice()));
            }
        }

        let mut trace_map = IndexMap::new();
        trace_map.insert(body_hole, body_traces);
        trace_map.insert(subsequent_hole, subsequent_traces);
        Some(Decomposition { subprog, trace_map })
    }

    // ------------------------------------------------------------------
    // Shared subroutines
    // ------------------------------------------------------------------

    /// Variable-covering-minimal anchor subset: keep a candidate only if it
    /// introduces a `(kind, used-var)` pair not covered yet.
    fn reduce_anchors(&self, candidates: Vec<TraceSource>) -> Vec<TraceSource> {
        let mut covered: IndexSet<(SourceKind, String)> = IndexSet::new();
        let mut reduced = Vec::new();
        for stmt in candidates {
            let mut vars: IndexSet<(SourceKind, String)> = self
                .facts
                .used(&stmt.src)
                .iter()
                .map(|v| (stmt.kind, v.clone()))
                .collect();
            if vars.is_empty() {
                vars.insert((stmt.kind, NO_VARS.to_owned()));
            }
            if vars.iter().any(|v| !covered.contains(v)) {
                covered.extend(vars);
                reduced.push(stmt);
            }
        }
        reduced
    }

    /// A body segment must touch the loop condition (write a variable the
    /// guard reads) or leave the loop through a `return`.
    fn loop_body_is_valid(&self, seg: &[TraceItem], guards: &[TraceSource]) -> bool {
        let guard_vars: IndexSet<&String> = guards
            .iter()
            .flat_map(|g| self.facts.used(&g.src).iter())
            .collect();
        let writes_guard_var = seg.iter().any(|item| {
            self.facts
                .written(&item.source.src)
                .iter()
                .any(|v| guard_vars.contains(v))
        });
        let returns = seg
            .last()
            .is_some_and(|item| statement_is_return(&item.source.src));
        writes_guard_var || returns
    }
}

/// A branch is probably dead-code padding when its sub-traces share no
/// source text at all. Known to yield false negatives on very short real
/// branches; kept deliberately.
pub(crate) fn branch_likely_bogus(subtraces: &[Subtrace]) -> bool {
    let mut common: Option<IndexSet<&str>> = None;
    for st in subtraces {
        let texts: IndexSet<&str> = st.iter().map(|item| item.source.src.as_str()).collect();
        common = Some(match common {
            None => texts,
            Some(prev) => prev.intersection(&texts).copied().collect(),
        });
    }
    common.is_none_or(|c| c.is_empty())
}

/// Sources strictly after the first occurrence of `pat` (any polarity).
fn sources_after(st: &[TraceItem], pat: &TraceSource) -> Vec<TraceSource> {
    match st.iter().position(|x| x.source.matches(pat)) {
        Some(pos) => st[pos + 1..].iter().map(|x| x.source.clone()).collect(),
        None => Vec::new(),
    }
}

/// Ordered intersection: elements of the first sequence present in all
/// others, first-sequence order preserved.
fn sequence_intersection(seqs: &[Vec<TraceSource>]) -> Vec<TraceSource> {
    let Some((first, rest)) = seqs.split_first() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|x| rest.iter().all(|s| s.iter().any(|y| y.matches(x))))
        .cloned()
        .collect()
}

/// Index of the last item matching `pat`.
fn last_match(st: &[TraceItem], pat: &TraceSource) -> Option<usize> {
    st.iter().rposition(|x| x.source.matches(pat))
}

/// Given the index of the last `pat` occurrence, the start of the final run
/// of consecutive `pat` items and whether a tail follows the run.
fn anchor_run(st: &[TraceItem], last: usize, pat: &TraceSource) -> (usize, bool) {
    let mut run_start = last;
    while run_start > 0 && st[run_start - 1].source.matches(pat) {
        run_start -= 1;
    }
    (run_start, last + 1 < st.len())
}

/// Body segments of a single-guard loop: each segment follows a true
/// observation and runs until the next observation of the guard (either
/// polarity) or the end of the scope. A segment that drifts off the end
/// inside control flow gets a synthetic `break;` appended.
fn loop_body_segments(
    scope: &[TraceItem],
    guard: &TraceSource,
    true_guard: &TraceSource,
    anchored_at_exit: bool,
) -> Vec<Vec<TraceItem>> {
    let mut segments = Vec::new();
    let mut i = 0;
    while i < scope.len() {
        if !scope[i].source.matches(true_guard) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < scope.len() && !scope[j].source.matches(guard) {
            j += 1;
        }
        let mut seg: Vec<TraceItem> = scope[i + 1..j].to_vec();
        if !seg.is_empty() {
            let followed_by_guard = j < scope.len();
            let last = seg.last().expect("non-empty");
            if !statement_has_control_flow(&last.source.src)
                && !followed_by_guard
                && !anchored_at_exit
            {
                let post = last.post_state.clone();
                seg.push(TraceItem::new(
                    TraceSource::stmt("break;"),
                    post.clone(),
                    post,
                ));
            }
            segments.push(seg);
        }
        i = j;
    }
    segments
}

/// `Seq(While(compound-guard, ?[P]), ?[P])`; returns the subprogram plus the
/// continuation and body holes.
fn compound_while_skeleton(
    guards: &[TraceSource],
    swap: bool,
    composition: GuardComposition,
) -> (Program, NodeId, NodeId) {
    let mut subprog = Program::new(Nonterminal::P);
    subprog.expand(subprog.leftmost_unknown().expect("hole"), ProdKind::Seq, None);
    subprog.expand(
        subprog.leftmost_unknown().expect("hole"),
        ProdKind::While,
        None,
    );
    subprog.expand(
        subprog.leftmost_unknown().expect("guard hole"),
        ProdKind::SourceGuard,
        Some(Payload::Guard(GuardSpec::compound(
            guards.iter().map(|g| g.src.clone()),
            swap,
            composition,
        ))),
    );
    let unks = subprog.unknowns().to_vec();
    (subprog, unks[0], unks[1])
}
