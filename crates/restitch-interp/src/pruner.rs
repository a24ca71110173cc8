//! Trace-based pruning of partial programs.

use indexmap::IndexMap;
use log::debug;

use restitch_core::Program;
use restitch_core::format_compact;
use restitch_core::source::statement_is_return;
use restitch_core::trace::Trace;
use restitch_core::VarFacts;

use crate::runner::TraceRunner;

/// Decides whether a partial program can be discarded without expanding it
/// further. Memoized on the canonical printed form; the memo is owned by one
/// search worker and reset per sketch.
pub struct TracePruner<'a> {
    runner: TraceRunner<'a>,
    cache: IndexMap<String, bool>,
    cache_hits: usize,
}

impl<'a> TracePruner<'a> {
    pub fn new(facts: &'a VarFacts) -> Self {
        Self {
            runner: TraceRunner::new(facts),
            cache: IndexMap::new(),
            cache_hits: 0,
        }
    }

    /// True when some trace proves the partial program can never be
    /// completed into a match.
    ///
    /// `allow_return` covers enumerative search over a complete sketch: a
    /// candidate that already explains a whole returning trace is complete
    /// rather than over-long, so completion only fails it when the trace
    /// does not end in a `return`.
    pub fn prune(&mut self, prog: &Program, traces: &[Trace], allow_return: bool) -> bool {
        let key = format_compact(prog);
        if let Some(&pruned) = self.cache.get(&key) {
            self.cache_hits += 1;
            return pruned;
        }

        let mut pruned = false;
        for trace in traces {
            let verdict = self.runner.run_check(prog, &trace.items, true, false);
            let ok = if !verdict.safe {
                false
            } else if !verdict.complete {
                true
            } else {
                allow_return
                    && trace
                        .items
                        .last()
                        .is_some_and(|item| statement_is_return(&item.source.src))
            };
            if !ok {
                debug!("pruning partial program: {key}");
                pruned = true;
                break;
            }
        }
        self.cache.insert(key, pruned);
        pruned
    }

    /// Drop the memo. Called between sketches: the sub-traces change, so
    /// cached verdicts no longer apply.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }
}
