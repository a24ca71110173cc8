//! Run statistics and outcomes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::program::Program;

/// Lifecycle of one search worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Pending,
    Complete,
    Timeout,
    Error,
}

/// User-visible result of a deobfuscation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    Complete(Program),
    Timeout,
    Error(String),
}

impl Outcome {
    pub fn program(&self) -> Option<&Program> {
        match self {
            Outcome::Complete(prog) => Some(prog),
            _ => None,
        }
    }
}

/// Counters one search worker accumulates. Everything here is monotone; the
/// driver merges per-worker stats into the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStats {
    pub status: Status,

    // Sketch enumeration
    pub complete_sketches: usize,
    pub partial_sketches: usize,
    pub pruned_sketches: usize,
    /// Complete sketches rejected by phantom evaluation.
    pub phantom_pruned_sketches: usize,

    // Enumerative synthesis
    pub iterations: usize,
    pub candidates: usize,
    pub pruned_partial: usize,
    pub not_pruned_partial: usize,
    pub syntax_pruned: usize,
    pub cache_hits: usize,

    pub deobfuscation_time: Duration,
}

impl SearchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another worker's counters into this one. Status keeps the most
    /// significant value (`Complete` beats `Timeout` beats the rest).
    pub fn merge(&mut self, other: &SearchStats) {
        self.complete_sketches += other.complete_sketches;
        self.partial_sketches += other.partial_sketches;
        self.pruned_sketches += other.pruned_sketches;
        self.phantom_pruned_sketches += other.phantom_pruned_sketches;
        self.iterations += other.iterations;
        self.candidates += other.candidates;
        self.pruned_partial += other.pruned_partial;
        self.not_pruned_partial += other.not_pruned_partial;
        self.syntax_pruned += other.syntax_pruned;
        self.cache_hits += other.cache_hits;
        self.deobfuscation_time = self.deobfuscation_time.max(other.deobfuscation_time);
        self.status = match (self.status, other.status) {
            (Status::Complete, _) | (_, Status::Complete) => Status::Complete,
            (Status::Timeout, _) | (_, Status::Timeout) => Status::Timeout,
            (Status::Error, _) | (_, Status::Error) => Status::Error,
            _ => Status::Pending,
        };
    }
}

#[cfg(test)]
mod stats_tests {
    use super::*;

    #[test]
    fn merge_prefers_complete_status() {
        let mut a = SearchStats {
            status: Status::Timeout,
            candidates: 3,
            ..SearchStats::default()
        };
        let b = SearchStats {
            status: Status::Complete,
            candidates: 5,
            ..SearchStats::default()
        };
        a.merge(&b);
        assert_eq!(a.status, Status::Complete);
        assert_eq!(a.candidates, 8);
    }
}
