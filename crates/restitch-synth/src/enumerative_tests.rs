use std::time::{Duration, Instant};

use restitch_core::grammar::{Nonterminal, TerminalPool};
use restitch_core::program::Program;
use restitch_core::stats::SearchStats;
use restitch_core::{format_c, VarFacts};
use restitch_interp::TracePruner;

use crate::enumerative::EnumerativeSearch;
use crate::queue::SizeModel;
use crate::testutil::TraceBuilder;
use crate::Error;

fn assign_facts() -> VarFacts {
    let mut facts = VarFacts::new();
    for (src, var) in [("a = 1;", "a"), ("b = 2;", "b"), ("z = 9;", "z")] {
        facts.record_used(src, [var]);
        facts.record_written(src, [var]);
    }
    facts.record_used("return a;", ["a"]);
    facts
}

#[test]
fn finds_the_single_statement_fill() {
    let facts = assign_facts();
    let traces = vec![
        TraceBuilder::new(&[], &[("a", 0)])
            .assign("a = 1;", &[("a", 1)])
            .build("1"),
    ];
    let pool = TerminalPool::from_stmts(["a = 1;"]);
    let search = EnumerativeSearch {
        facts: &facts,
        pool: &pool,
        traces: &traces,
        return_on_first: false,
        allow_return: false,
        overall_deadline: None,
        slot_deadline: None,
    };
    let mut stats = SearchStats::new();
    let outcome = search
        .run(Program::new(Nonterminal::P), &mut SizeModel, None, &mut stats)
        .unwrap();

    let (pruned, prog) = outcome.best().expect("a solution");
    assert!(pruned.is_empty());
    assert_eq!(format_c(prog), "a = 1;");
    assert!(stats.candidates >= 1);
}

#[test]
fn finds_an_ordered_sequence() {
    let facts = assign_facts();
    let traces = vec![
        TraceBuilder::new(&[], &[("a", 0), ("b", 0)])
            .assign("a = 1;", &[("a", 1)])
            .assign("b = 2;", &[("b", 2)])
            .build("0"),
    ];
    let pool = TerminalPool::from_stmts(["b = 2;", "a = 1;"]);
    let search = EnumerativeSearch {
        facts: &facts,
        pool: &pool,
        traces: &traces,
        return_on_first: false,
        allow_return: false,
        overall_deadline: None,
        slot_deadline: None,
    };
    let mut stats = SearchStats::new();
    let mut pruner = TracePruner::new(&facts);
    let outcome = search
        .run(
            Program::new(Nonterminal::P),
            &mut SizeModel,
            Some(&mut pruner),
            &mut stats,
        )
        .unwrap();

    let (_, prog) = outcome.best().expect("a solution");
    assert_eq!(format_c(prog), "a = 1;\nb = 2;");
    assert!(
        stats.pruned_partial > 0,
        "the wrong-order prefix gets trace-pruned"
    );
}

#[test]
fn syntax_pruning_bounds_programs_by_the_pool() {
    let facts = assign_facts();
    let traces = vec![
        TraceBuilder::new(&[], &[("a", 0), ("b", 0)])
            .assign("a = 1;", &[("a", 1)])
            .assign("b = 2;", &[("b", 2)])
            .build("0"),
    ];
    // One terminal cannot fill two slots.
    let pool = TerminalPool::from_stmts(["a = 1;"]);
    let search = EnumerativeSearch {
        facts: &facts,
        pool: &pool,
        traces: &traces,
        return_on_first: false,
        allow_return: false,
        overall_deadline: None,
        slot_deadline: None,
    };
    let mut stats = SearchStats::new();
    let outcome = search
        .run(Program::new(Nonterminal::P), &mut SizeModel, None, &mut stats)
        .unwrap();

    assert!(outcome.solutions.is_empty());
    assert!(!outcome.timed_out);
    assert!(stats.syntax_pruned > 0);
}

#[test]
fn records_solutions_under_their_pruned_sets() {
    let facts = assign_facts();
    // The trace ran dead code on `z` before the statement we can explain.
    let traces = vec![
        TraceBuilder::new(&[], &[("a", 0), ("z", 0)])
            .assign("z = 9;", &[("z", 9)])
            .assign("a = 1;", &[("a", 1)])
            .build("1"),
    ];
    let pool = TerminalPool::from_stmts(["a = 1;"]);
    let search = EnumerativeSearch {
        facts: &facts,
        pool: &pool,
        traces: &traces,
        return_on_first: true,
        allow_return: false,
        overall_deadline: None,
        slot_deadline: None,
    };
    let mut stats = SearchStats::new();
    let outcome = search
        .run(Program::new(Nonterminal::P), &mut SizeModel, None, &mut stats)
        .unwrap();

    let (pruned, prog) = outcome.best().expect("a pruning solution");
    assert_eq!(pruned, &vec!["z".to_owned()]);
    assert_eq!(format_c(prog), "a = 1;");
}

#[test]
fn slot_deadline_reports_timeout() {
    let facts = assign_facts();
    let traces = vec![
        TraceBuilder::new(&[], &[("a", 0)])
            .assign("a = 1;", &[("a", 1)])
            .build("1"),
    ];
    let pool = TerminalPool::from_stmts(["a = 1;"]);
    let search = EnumerativeSearch {
        facts: &facts,
        pool: &pool,
        traces: &traces,
        return_on_first: false,
        allow_return: false,
        overall_deadline: None,
        slot_deadline: Some(Instant::now() - Duration::from_millis(1)),
    };
    let mut stats = SearchStats::new();
    let outcome = search
        .run(Program::new(Nonterminal::P), &mut SizeModel, None, &mut stats)
        .unwrap();
    assert!(outcome.timed_out);
    assert!(outcome.solutions.is_empty());
}

#[test]
fn overall_deadline_raises() {
    let facts = assign_facts();
    let traces = vec![
        TraceBuilder::new(&[], &[("a", 0)])
            .assign("a = 1;", &[("a", 1)])
            .build("1"),
    ];
    let pool = TerminalPool::from_stmts(["a = 1;"]);
    let search = EnumerativeSearch {
        facts: &facts,
        pool: &pool,
        traces: &traces,
        return_on_first: false,
        allow_return: false,
        overall_deadline: Some(Instant::now() - Duration::from_millis(1)),
        slot_deadline: None,
    };
    let mut stats = SearchStats::new();
    let result = search.run(Program::new(Nonterminal::P), &mut SizeModel, None, &mut stats);
    assert_eq!(result.unwrap_err(), Error::SynthesisTimeout);
}
