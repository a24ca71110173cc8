//! Core data model for restitch.
//!
//! restitch recovers a small structured program, equivalent on a set of
//! recorded execution traces, from a control-flow-obfuscated C function.
//! This crate holds everything the engine crates share:
//!
//! - `source` / `trace` - executed source lines and recorded traces
//! - `facts` - per-line variable-use facts from the parser
//! - `grammar` / `guard` / `program` - the structured-program model
//! - `frontend` - interface types for the external parser/trace producer
//! - `format` - canonical and C-like program rendering
//! - `config` / `stats` - search configuration and run statistics

pub mod config;
pub mod facts;
pub mod format;
pub mod frontend;
pub mod grammar;
pub mod guard;
pub mod program;
pub mod source;
pub mod stats;
pub mod trace;


pub use config::{Ablation, HeuristicConfig, HeuristicRules, SynthesisConfig};
pub use facts::VarFacts;
pub use format::{format_c, format_compact, format_function};
pub use frontend::{
    FunctionSignature, InputSpec, Param, SourceFileInfo, SourceLineInfo, SourceStats,
    canonicalize_guard_polarity,
};
pub use grammar::{Nonterminal, ProdKind, TerminalPool};
pub use guard::{GuardComposition, GuardSpec};
pub use program::{Node, NodeId, Payload, Program};
pub use source::{SourceKind, TraceSource};
pub use stats::{Outcome, SearchStats, Status};
pub use trace::{Subtrace, Trace, TraceItem, VarState, minimize};
