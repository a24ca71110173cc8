//! Search configuration.
//!
//! A `HeuristicConfig` is one worker's view of the sketch enumerator: which
//! structural rules it may apply and how large a sketch it may grow. A
//! `SynthesisConfig` governs a whole run: timeouts, ablations, worker count.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Structural rules the sketch enumerator may apply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeuristicRules: u8 {
        const ITE = 1 << 0;
        const WHILE = 1 << 1;
        const WHILE_NEGATED = 1 << 2;
        const WHILE_CONJUNCTION = 1 << 3;
        const WHILE_DISJUNCTION = 1 << 4;
        const WHILE_CONJUNCTION_NEGATED = 1 << 5;
        const WHILE_DISJUNCTION_NEGATED = 1 << 6;
    }
}

impl Serialize for HeuristicRules {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HeuristicRules {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_bits_truncate(u8::deserialize(deserializer)?))
    }
}

/// Per-worker sketch enumeration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicConfig {
    pub enabled_rules: HeuristicRules,
    /// Node-count bound on enumerated sketches.
    pub prog_size: usize,
    /// Guards whose text contains any of these fragments are never picked as
    /// decomposition candidates. Debugging aid, empty in production.
    pub debug_guard_blacklist: Vec<String>,
    /// Log every pruned partial sketch.
    pub log_pruned_sketches: bool,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            enabled_rules: HeuristicRules::ITE
                | HeuristicRules::WHILE
                | HeuristicRules::WHILE_CONJUNCTION,
            prog_size: 100,
            debug_guard_blacklist: Vec::new(),
            log_pruned_sketches: false,
        }
    }
}

impl HeuristicConfig {
    /// The rule portfolios the parallel driver fans out over. The first
    /// entry is the default config; the others trade conjunction handling
    /// for negated/disjunctive rules.
    pub fn portfolio() -> Vec<HeuristicConfig> {
        let base = HeuristicConfig::default();
        vec![
            base.clone(),
            HeuristicConfig {
                enabled_rules: HeuristicRules::ITE
                    | HeuristicRules::WHILE
                    | HeuristicRules::WHILE_NEGATED
                    | HeuristicRules::WHILE_DISJUNCTION,
                ..base.clone()
            },
            HeuristicConfig {
                enabled_rules: HeuristicRules::ITE
                    | HeuristicRules::WHILE
                    | HeuristicRules::WHILE_NEGATED
                    | HeuristicRules::WHILE_CONJUNCTION
                    | HeuristicRules::WHILE_DISJUNCTION,
                ..base
            },
        ]
    }
}

/// Which ablation a run executes, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ablation {
    /// Replace the heuristic enumerator with the structural one.
    NoHeuristics,
    /// Skip phantom evaluation of complete sketches.
    NoSketchPruning,
    /// Synthesize over whole sketches instead of per-slot.
    NoDecomposition,
    /// Skip trace-based pruning of partial programs.
    NoTracePruning,
}

/// Run-level synthesis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Budget for one sketch's per-slot synthesis.
    pub synthesis_timeout: Duration,
    /// Budget for the whole deobfuscation.
    pub overall_timeout: Duration,
    /// Fixed-point bound for the variable dependency closure.
    pub closure_depth: usize,
    pub disable_trace_pruning: bool,
    pub disable_decomposition: bool,
    pub disable_heuristics: bool,
    pub disable_sketch_pruning: bool,
    /// Parallel search workers.
    pub workers: usize,
    /// Seed for the random search model.
    pub seed: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            synthesis_timeout: Duration::from_secs(20),
            overall_timeout: Duration::from_secs(600),
            closure_depth: 10,
            disable_trace_pruning: false,
            disable_decomposition: false,
            disable_heuristics: false,
            disable_sketch_pruning: false,
            workers: 4,
            seed: 0,
        }
    }
}

impl SynthesisConfig {
    /// Preset for an ablation study. Disabling the heuristics also disables
    /// decomposition and sketch pruning, which are not defined without them.
    pub fn for_ablation(ablation: Ablation) -> Self {
        let mut config = Self {
            synthesis_timeout: Duration::from_secs(300),
            ..Self::default()
        };
        match ablation {
            Ablation::NoHeuristics => {
                config.disable_heuristics = true;
                config.disable_decomposition = true;
                config.disable_sketch_pruning = true;
            }
            Ablation::NoSketchPruning => config.disable_sketch_pruning = true,
            Ablation::NoDecomposition => config.disable_decomposition = true,
            Ablation::NoTracePruning => config.disable_trace_pruning = true,
        }
        config
    }
}
