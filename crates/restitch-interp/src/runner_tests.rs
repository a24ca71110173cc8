use indexmap::IndexSet;

use restitch_core::grammar::{Nonterminal, ProdKind};
use restitch_core::guard::{GuardComposition, GuardSpec};
use restitch_core::program::{Payload, Program};
use restitch_core::source::TraceSource;
use restitch_core::trace::{TraceItem, VarState, minimize};
use restitch_core::VarFacts;

use crate::TraceRunner;

fn state(pairs: &[(&str, &str)]) -> VarState {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn guard_item(src: &str, val: bool, st: &[(&str, &str)]) -> TraceItem {
    TraceItem::new(TraceSource::guard(src).with_val(val), state(st), state(st))
}

fn stmt_item(src: &str, pre: &[(&str, &str)], post: &[(&str, &str)]) -> TraceItem {
    TraceItem::new(TraceSource::stmt(src), state(pre), state(post))
}

fn expand_next(prog: &mut Program, kind: ProdKind, payload: Option<Payload>) {
    let unk = prog.leftmost_unknown().expect("no hole left");
    prog.expand(unk, kind, payload);
}

fn stmt(prog: &mut Program, text: &str) {
    expand_next(prog, ProdKind::Stmt, None);
    expand_next(prog, ProdKind::SourceStmt, Some(Payload::Stmt(text.to_owned())));
}

fn guard(prog: &mut Program, spec: GuardSpec) {
    expand_next(prog, ProdKind::SourceGuard, Some(Payload::Guard(spec)));
}

fn countdown_facts() -> VarFacts {
    let mut facts = VarFacts::new();
    facts.record_used("n > 0", ["n"]);
    facts.record_used("n = n - 1;", ["n"]);
    facts.record_written("n = n - 1;", ["n"]);
    facts.record_used("return n;", ["n"]);
    facts
}

fn countdown_items(n: u32) -> Vec<TraceItem> {
    let mut items = Vec::new();
    let mut v = n;
    while v > 0 {
        items.push(guard_item("n > 0", true, &[("n", &v.to_string())]));
        let next = v - 1;
        items.push(stmt_item(
            "n = n - 1;",
            &[("n", &v.to_string())],
            &[("n", &next.to_string())],
        ));
        v = next;
    }
    items.push(guard_item("n > 0", false, &[("n", "0")]));
    items.push(stmt_item("return n;", &[("n", "0")], &[("n", "0")]));
    items
}

fn countdown_program() -> Program {
    let mut p = Program::new(Nonterminal::P);
    expand_next(&mut p, ProdKind::Seq, None);
    expand_next(&mut p, ProdKind::While, None);
    guard(&mut p, GuardSpec::single("n > 0", false));
    expand_next(&mut p, ProdKind::Single, None);
    stmt(&mut p, "n = n - 1;");
    expand_next(&mut p, ProdKind::Single, None);
    stmt(&mut p, "return n;");
    p
}

#[test]
fn while_countdown_completes() {
    let facts = countdown_facts();
    let runner = TraceRunner::new(&facts);
    let prog = countdown_program();

    for n in [1, 3] {
        let verdict = runner.run_check(&prog, &countdown_items(n), false, false);
        assert!(verdict.safe);
        assert!(verdict.complete, "countdown from {n} should complete");
        assert!(verdict.pruned.is_empty());
    }
}

#[test]
fn if_branches_follow_observed_values() {
    let mut facts = VarFacts::new();
    facts.record_used("x > 0", ["x"]);
    facts.record_written("y = 1;", ["y"]);
    facts.record_used("return y;", ["y"]);
    let runner = TraceRunner::new(&facts);

    // If(x > 0, y = 1;); return y;
    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Seq, None);
    expand_next(&mut prog, ProdKind::If, None);
    guard(&mut prog, GuardSpec::single("x > 0", false));
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "y = 1;");
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "return y;");

    let taken = vec![
        guard_item("x > 0", true, &[("x", "1"), ("y", "0")]),
        stmt_item(
            "y = 1;",
            &[("x", "1"), ("y", "0")],
            &[("x", "1"), ("y", "1")],
        ),
        stmt_item(
            "return y;",
            &[("x", "1"), ("y", "1")],
            &[("x", "1"), ("y", "1")],
        ),
    ];
    let skipped = vec![
        guard_item("x > 0", false, &[("x", "-1"), ("y", "0")]),
        stmt_item(
            "return y;",
            &[("x", "-1"), ("y", "0")],
            &[("x", "-1"), ("y", "0")],
        ),
    ];

    assert!(runner.run_check(&prog, &taken, false, false).complete);
    assert!(runner.run_check(&prog, &skipped, false, false).complete);
}

#[test]
fn wrong_statement_order_is_unsafe() {
    let mut facts = VarFacts::new();
    facts.record_written("a = 1;", ["a"]);
    facts.record_written("b = 2;", ["b"]);
    let runner = TraceRunner::new(&facts);

    // b = 2; a = 1; against a trace that runs them the other way round.
    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Seq, None);
    stmt(&mut prog, "b = 2;");
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "a = 1;");

    let items = vec![
        stmt_item(
            "a = 1;",
            &[("a", "0"), ("b", "0")],
            &[("a", "1"), ("b", "0")],
        ),
        stmt_item(
            "b = 2;",
            &[("a", "1"), ("b", "0")],
            &[("a", "1"), ("b", "2")],
        ),
    ];
    let verdict = runner.run_check(&prog, &items, false, false);
    assert!(!verdict.safe);
}

#[test]
fn partial_program_survives_prefix_match() {
    let mut facts = VarFacts::new();
    facts.record_written("a = 1;", ["a"]);
    let runner = TraceRunner::new(&facts);

    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Seq, None);
    stmt(&mut prog, "a = 1;");
    // Second Seq child stays an open hole.

    let items = vec![
        stmt_item("a = 1;", &[("a", "0")], &[("a", "1")]),
        stmt_item("return a;", &[("a", "1")], &[("a", "1")]),
    ];
    assert!(runner.partial_ok(&prog, &items, false));

    let verdict = runner.run_check(&prog, &items, false, true);
    assert!(verdict.safe);
    assert!(!verdict.complete, "hole keeps the program incomplete");
}

#[test]
fn dead_write_divergence_is_pruned_in_pruning_mode() {
    let mut facts = VarFacts::new();
    facts.record_written("y = 1;", ["y"]);
    facts.record_used("y = 1;", ["y"]);
    let runner = TraceRunner::new(&facts);

    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "y = 1;");

    // The trace ran dead code writing `z` before the real statement.
    let items = vec![
        stmt_item(
            "z = 5;",
            &[("y", "0"), ("z", "0")],
            &[("y", "0"), ("z", "5")],
        ),
        stmt_item(
            "y = 1;",
            &[("y", "0"), ("z", "5")],
            &[("y", "1"), ("z", "5")],
        ),
    ];

    let strict = runner.run_check(&prog, &items, false, false);
    assert!(!strict.safe);

    let pruning = runner.run_check(&prog, &items, true, false);
    assert!(pruning.safe);
    assert!(pruning.complete);
    assert_eq!(
        pruning.pruned,
        IndexSet::from(["z".to_string()]),
        "the diverging dead variable gets pruned"
    );
}

#[test]
fn pruning_verdict_is_monotone_under_projection() {
    // Re-running on the trace projected away from the pruned set must stay
    // complete without needing pruning at all.
    let mut facts = VarFacts::new();
    facts.record_written("y = 1;", ["y"]);
    facts.record_used("y = 1;", ["y"]);
    facts.record_written("z = 5;", ["z"]);
    facts.record_used("z = 5;", ["z"]);
    let runner = TraceRunner::new(&facts);

    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "y = 1;");

    let items = vec![
        stmt_item(
            "z = 5;",
            &[("y", "0"), ("z", "0")],
            &[("y", "0"), ("z", "5")],
        ),
        stmt_item(
            "y = 1;",
            &[("y", "0"), ("z", "5")],
            &[("y", "1"), ("z", "5")],
        ),
    ];
    let verdict = runner.run_check(&prog, &items, true, false);
    assert!(verdict.complete);

    let keep: IndexSet<String> = ["y".to_string()].into_iter().collect();
    let projected = minimize(&items, &keep, &facts, true, true).unwrap();
    let reprojected = runner.run_check(&prog, &projected, false, false);
    assert!(reprojected.complete);
}

#[test]
fn tmp_may_drift_unless_read_without_write() {
    let mut facts = VarFacts::new();
    facts.record_written("y = 1;", ["y"]);
    facts.record_used("y = 1;", ["y"]);
    facts.record_used("y = tmp;", ["tmp"]);
    facts.record_written("y = tmp;", ["y"]);
    let runner = TraceRunner::new(&facts);

    let drift_items = vec![
        stmt_item(
            "skip;",
            &[("y", "0"), ("tmp", "0")],
            &[("y", "0"), ("tmp", "9")],
        ),
        stmt_item(
            "y = 1;",
            &[("y", "0"), ("tmp", "9")],
            &[("y", "1"), ("tmp", "9")],
        ),
    ];

    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "y = 1;");
    let verdict = runner.run_check(&prog, &drift_items, false, false);
    assert!(verdict.complete, "tmp drift is forgiven for non-readers");
    assert!(verdict.pruned.is_empty());

    // A statement that reads tmp without writing it must see the real value.
    let mut reader = Program::new(Nonterminal::P);
    expand_next(&mut reader, ProdKind::Single, None);
    stmt(&mut reader, "y = tmp;");
    let read_items = vec![
        stmt_item(
            "skip;",
            &[("y", "0"), ("tmp", "0")],
            &[("y", "0"), ("tmp", "9")],
        ),
        stmt_item(
            "y = tmp;",
            &[("y", "0"), ("tmp", "9")],
            &[("y", "9"), ("tmp", "9")],
        ),
    ];
    let verdict = runner.run_check(&reader, &read_items, false, false);
    assert!(!verdict.safe);
}

#[test]
fn break_exits_the_loop_and_consecutive_breaks_fail() {
    let mut facts = VarFacts::new();
    facts.record_used("g", [] as [&str; 0]);
    facts.record_written("x = x + 1;", ["x"]);
    facts.record_used("x = x + 1;", ["x"]);
    facts.record_used("return x;", ["x"]);
    let runner = TraceRunner::new(&facts);

    // Seq(While(g, Seq(x = x + 1;, break;)), return x;)
    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Seq, None);
    expand_next(&mut prog, ProdKind::While, None);
    guard(&mut prog, GuardSpec::single("g", false));
    expand_next(&mut prog, ProdKind::Seq, None);
    stmt(&mut prog, "x = x + 1;");
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "break;");
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "return x;");

    let items = vec![
        guard_item("g", true, &[("x", "0")]),
        stmt_item("x = x + 1;", &[("x", "0")], &[("x", "1")]),
        stmt_item("return x;", &[("x", "1")], &[("x", "1")]),
    ];
    let verdict = runner.run_check(&prog, &items, false, false);
    assert!(verdict.safe);
    assert!(verdict.complete);

    // break; break; can never execute.
    let mut double = Program::new(Nonterminal::P);
    expand_next(&mut double, ProdKind::Seq, None);
    stmt(&mut double, "break;");
    expand_next(&mut double, ProdKind::Single, None);
    stmt(&mut double, "break;");
    let verdict = runner.run_check(&double, &items, false, false);
    assert!(!verdict.safe);
}

#[test]
fn compound_and_guard_short_circuits() {
    let mut facts = VarFacts::new();
    facts.record_used("i < n", ["i", "n"]);
    facts.record_used("i < m", ["i", "m"]);
    facts.record_written("i = i + 1;", ["i"]);
    facts.record_used("i = i + 1;", ["i"]);
    let runner = TraceRunner::new(&facts);

    // If((i < n && i < m), i = i + 1;)
    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Single, None);
    expand_next(&mut prog, ProdKind::If, None);
    guard(
        &mut prog,
        GuardSpec::compound(["i < n", "i < m"], false, GuardComposition::And),
    );
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "i = i + 1;");

    let st = [("i", "0"), ("n", "0"), ("m", "5")];
    // First conjunct false: the second guard is never evaluated.
    let items = vec![
        guard_item("i < n", false, &st),
        stmt_item("done;", &st, &[("i", "9"), ("n", "0"), ("m", "5")]),
    ];
    let verdict = runner.run_check(&prog, &items, false, false);
    assert!(verdict.safe);
    assert!(!verdict.complete, "the skipped tail changed the state");

    let both = [("i", "0"), ("n", "5"), ("m", "5")];
    let items = vec![
        guard_item("i < n", true, &both),
        guard_item("i < m", true, &both),
        stmt_item("i = i + 1;", &both, &[("i", "1"), ("n", "5"), ("m", "5")]),
    ];
    let verdict = runner.run_check(&prog, &items, false, false);
    assert!(verdict.safe);
    assert!(verdict.complete);
}

#[test]
fn negated_trace_guard_matches_positive_text() {
    let mut facts = VarFacts::new();
    facts.record_used("x < 0", ["x"]);
    facts.record_used("return x;", ["x"]);
    let runner = TraceRunner::new(&facts);

    // While(x < 0, ...) never entered; the trace recorded `!(x < 0)` true.
    let mut prog = Program::new(Nonterminal::P);
    expand_next(&mut prog, ProdKind::Seq, None);
    expand_next(&mut prog, ProdKind::If, None);
    guard(&mut prog, GuardSpec::single("x < 0", false));
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "x = -x;");
    expand_next(&mut prog, ProdKind::Single, None);
    stmt(&mut prog, "return x;");

    let items = vec![
        guard_item("!(x < 0)", true, &[("x", "3")]),
        stmt_item("return x;", &[("x", "3")], &[("x", "3")]),
    ];
    let verdict = runner.run_check(&prog, &items, false, false);
    assert!(verdict.safe);
    assert!(verdict.complete, "inverted polarity resolves to false, skipping the body");
}
