//! Interface types for the external collaborators.
//!
//! The parser and the trace producer live outside this repository; they hand
//! the engine plain data in the shapes below. The one piece of real work
//! here is guard-polarity canonicalization, which has to run after trace
//! production and before synthesis.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::facts::VarFacts;
use crate::source::SourceKind;
use crate::trace::Trace;

/// Signature of the obfuscated function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub return_type: String,
    pub params: Vec<Param>,
}

impl FunctionSignature {
    pub fn has_return_value(&self) -> bool {
        self.return_type != "void"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: String,
    /// Full declaration text, e.g. `int n`.
    pub decl: String,
}

/// One source line of the obfuscated function, as the parser saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLineInfo {
    pub text: String,
    pub kind: SourceKind,
    pub start_line: u32,
    /// Secondary guard on the same line (rewritten `switch` cases).
    pub additional_guard: Option<String>,
}

/// Source-level statistics reported alongside the parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub num_loc: usize,
    pub num_if: usize,
    pub num_while: usize,
    pub num_switch: usize,
    pub num_case: usize,
}

/// Everything the parser produces for one source file. `switch`/`case`
/// constructs arrive already rewritten into guard chains; the mapping is
/// kept for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFileInfo {
    pub sources: IndexMap<u32, SourceLineInfo>,
    pub functions: IndexMap<u32, String>,
    pub switch_case_guards: IndexMap<String, Vec<String>>,
    pub signature: FunctionSignature,
    pub stats: SourceStats,
}

/// Input specification the trace producer ran the binary under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub args: Vec<String>,
    /// Sizes for array-typed arguments, by name.
    pub array_size_map: IndexMap<String, String>,
}

/// Canonicalize guard polarity across all traces.
///
/// Tigress likes to emit a guard and its textual negation (`x < 0` next to
/// `!(x < 0)`). Whenever a negated guard's positive form also occurs in some
/// trace (or unconditionally with `negate_all`), every occurrence of the
/// negated form is rewritten to the positive text with the observed value
/// flipped. Facts are aliased so lookups on the new text keep working.
/// Returns the applied `negated text -> positive text` map.
pub fn canonicalize_guard_polarity(
    traces: &mut [Trace],
    facts: &mut VarFacts,
    negate_all: bool,
) -> IndexMap<String, String> {
    let mut negation_map: IndexMap<String, String> = IndexMap::new();
    let occurring: Vec<_> = traces
        .iter()
        .flat_map(|t| t.sources())
        .filter(|s| s.kind == SourceKind::Guard)
        .cloned()
        .collect();

    for guard in &occurring {
        let Some(positive) = guard.try_negate() else {
            continue;
        };
        if negate_all || occurring.iter().any(|s| s.src == positive.src) {
            negation_map.insert(guard.src.clone(), positive.src);
        }
    }

    for trace in traces.iter_mut() {
        for item in &mut trace.items {
            if item.source.kind != SourceKind::Guard {
                continue;
            }
            if let Some(positive) = negation_map.get(&item.source.src) {
                item.source.src = positive.clone();
                item.source.val = item.source.val.map(|v| !v);
            }
        }
    }

    for (from, to) in &negation_map {
        facts.merge_alias(from, to);
    }
    negation_map
}

#[cfg(test)]
mod frontend_tests {
    use super::*;
    use crate::source::TraceSource;
    use crate::trace::TraceItem;
    use indexmap::IndexMap as Map;

    fn guard_item(src: &str, val: bool) -> TraceItem {
        TraceItem::new(
            TraceSource::guard(src).with_val(val),
            Map::new(),
            Map::new(),
        )
    }

    #[test]
    fn negated_guard_with_matching_positive_is_rewritten() {
        let mut traces = vec![
            Trace::new(vec![guard_item("x < 0", true)], vec!["-1".into()], "0"),
            Trace::new(vec![guard_item("!(x < 0)", true)], vec!["1".into()], "1"),
        ];
        let mut facts = VarFacts::new();
        facts.record_used("!(x < 0)", ["x"]);

        let map = canonicalize_guard_polarity(&mut traces, &mut facts, false);
        assert_eq!(map.get("!(x < 0)").map(String::as_str), Some("x < 0"));

        let rewritten = &traces[1].items[0].source;
        assert_eq!(rewritten.src, "x < 0");
        assert_eq!(rewritten.val, Some(false));
        assert!(facts.used("x < 0").contains("x"));
    }

    #[test]
    fn lone_negated_guard_is_kept_unless_forced() {
        let mut traces = vec![Trace::new(
            vec![guard_item("!(done)", false)],
            vec![],
            "0",
        )];
        let mut facts = VarFacts::new();

        let map = canonicalize_guard_polarity(&mut traces, &mut facts, false);
        assert!(map.is_empty());
        assert_eq!(traces[0].items[0].source.src, "!(done)");

        let map = canonicalize_guard_polarity(&mut traces, &mut facts, true);
        assert_eq!(map.len(), 1);
        assert_eq!(traces[0].items[0].source.src, "done");
        assert_eq!(traces[0].items[0].source.val, Some(true));
    }
}
