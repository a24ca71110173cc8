//! Top-level driver: a portfolio of search workers racing to a solution.
//!
//! Each worker runs the same pipeline under a different heuristic
//! configuration, sharing nothing but a cancellation flag. The first worker
//! to find a program wins and asks the rest to stop at their next
//! suspension point (between sketches).

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use log::info;

use restitch_core::frontend::FunctionSignature;
use restitch_core::stats::{Outcome, SearchStats, Status};
use restitch_core::trace::Trace;
use restitch_core::{HeuristicConfig, SynthesisConfig, VarFacts};

use crate::completer::DecompositionalCompleter;
use crate::Error;

/// One deobfuscation task: the traces of a single obfuscated function plus
/// the parser's facts about it.
#[derive(Debug, Clone)]
pub struct Job {
    pub traces: Vec<Trace>,
    pub facts: VarFacts,
    pub signature: FunctionSignature,
}

/// Portfolio-parallel deobfuscation driver.
pub struct Deobfuscator {
    config: SynthesisConfig,
}

impl Deobfuscator {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Run the portfolio and return the outcome plus merged statistics.
    pub fn run(&self, job: &Job) -> (Outcome, SearchStats) {
        if job.traces.is_empty() {
            let mut stats = SearchStats::new();
            stats.status = Status::Error;
            return (Outcome::Error("no traces to synthesize from".to_owned()), stats);
        }

        let mut portfolio = HeuristicConfig::portfolio();
        portfolio.truncate(self.config.workers.max(1));
        // The unheuristic ablation searches one space; racing rule subsets
        // would only burn cores.
        if self.config.disable_heuristics || self.config.workers <= 1 {
            portfolio.truncate(1);
        }

        let cancel = AtomicBool::new(false);
        let mut results: Vec<Result<(Option<restitch_core::Program>, SearchStats), String>> =
            Vec::new();

        thread::scope(|scope| {
            let handles: Vec<_> = portfolio
                .iter()
                .map(|heuristics| {
                    let cancel = &cancel;
                    let config = &self.config;
                    scope.spawn(move || {
                        let mut stats = SearchStats::new();
                        let completer = DecompositionalCompleter::new(&job.facts, config);
                        let started = Instant::now();
                        let result = completer.deobfuscate(
                            &job.traces,
                            job.signature.has_return_value(),
                            heuristics,
                            cancel,
                            &mut stats,
                        );
                        stats.deobfuscation_time = started.elapsed();
                        match result {
                            Ok(found) => {
                                stats.status = Status::Complete;
                                if found.is_some() {
                                    info!("worker found a solution; cancelling the rest");
                                    cancel.store(true, Ordering::Relaxed);
                                }
                                (found, stats)
                            }
                            Err(Error::SynthesisTimeout) => {
                                stats.status = Status::Timeout;
                                (None, stats)
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                results.push(handle.join().map_err(|_| "search worker panicked".to_owned()));
            }
        });

        let mut merged = SearchStats::new();
        let mut solution = None;
        let mut timed_out = false;
        let mut error = None;
        for result in results {
            match result {
                Ok((found, stats)) => {
                    merged.merge(&stats);
                    if solution.is_none() {
                        solution = found;
                    }
                    timed_out |= stats.status == Status::Timeout;
                }
                Err(message) => error = Some(message),
            }
        }

        let outcome = match (solution, timed_out, error) {
            (Some(prog), _, _) => {
                merged.status = Status::Complete;
                Outcome::Complete(prog)
            }
            (None, true, _) => {
                merged.status = Status::Timeout;
                Outcome::Timeout
            }
            (None, false, Some(message)) => {
                merged.status = Status::Error;
                Outcome::Error(message)
            }
            (None, false, None) => {
                merged.status = Status::Error;
                Outcome::Error("search space exhausted without a match".to_owned())
            }
        };
        (outcome, merged)
    }
}
