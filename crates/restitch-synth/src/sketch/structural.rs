//! Trace-blind sketch generation.
//!
//! The fallback enumerator used when the heuristics are ablated: expand the
//! grammar breadth-first, draw guards from the observed pool, and leave
//! every statement slot implicit. No trace ever guides the shape, so this
//! explodes quickly; it exists to measure what the heuristics buy.

use std::collections::VecDeque;

use restitch_core::grammar::{Nonterminal, ProdKind};
use restitch_core::program::{Node, Payload, Program};
use restitch_core::guard::GuardSpec;
use restitch_core::source::TraceSource;

/// BFS over structural expansions, yielding complete programs whose
/// statement slots are re-registered as open holes.
pub struct StructuralSketches {
    guards: Vec<TraceSource>,
    queue: VecDeque<Program>,
    max_size: usize,
}

/// All structural sketches over the given guard pool, smallest first.
pub fn structural_sketches(
    guards: Vec<TraceSource>,
    max_size: usize,
) -> StructuralSketches {
    let mut queue = VecDeque::new();
    queue.push_back(Program::new(Nonterminal::P));
    StructuralSketches {
        guards,
        queue,
        max_size,
    }
}

impl Iterator for StructuralSketches {
    type Item = Program;

    fn next(&mut self) -> Option<Program> {
        while let Some(prog) = self.queue.pop_front() {
            if prog.is_complete() {
                let mut prog = prog;
                for id in prog.unknown_nodes() {
                    prog.register_unknown(id);
                }
                return Some(prog);
            }
            if prog.node_count() > self.max_size {
                self.queue.clear();
                return None;
            }

            let hole = prog.leftmost_unknown().expect("incomplete program");
            let nonterm = match prog.node(hole) {
                Node::Unknown { nonterm } => *nonterm,
                Node::Value { .. } => unreachable!("hole is not a node"),
            };

            if nonterm == Nonterminal::Guard {
                for guard in &self.guards {
                    let mut next = prog.clone();
                    next.expand(
                        hole,
                        ProdKind::SourceGuard,
                        Some(Payload::Guard(GuardSpec::single(guard.src.clone(), false))),
                    );
                    self.queue.push_back(next);
                }
                continue;
            }

            let expansions: &[ProdKind] = match nonterm {
                Nonterminal::P => &[ProdKind::Single, ProdKind::Seq],
                Nonterminal::S => &[ProdKind::If, ProdKind::Ite, ProdKind::While],
                Nonterminal::Guard | Nonterminal::Stmt => &[],
            };
            for &kind in expansions {
                // A top-level `Single` duplicates the bare statement hole.
                if prog.node_count() == 1 && kind == ProdKind::Single {
                    continue;
                }
                let mut next = prog.clone();
                next.expand(hole, kind, None);
                self.queue.push_back(next);
            }
            // Or leave the hole as an implicit statement slot.
            let mut next = prog;
            next.release_unknown(hole);
            self.queue.push_back(next);
        }
        None
    }
}
