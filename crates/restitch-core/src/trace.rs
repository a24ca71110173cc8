//! Execution traces of the obfuscated binary.
//!
//! A trace is the ordered sequence of `(source line, pre-state, post-state)`
//! samples one input produced. Variable values are opaque tokens: the engine
//! only ever compares them for equality.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::facts::VarFacts;
use crate::source::{TraceSource, statement_has_control_flow};

/// Variable valuation at one execution point. Values are opaque tokens.
pub type VarState = IndexMap<String, String>;

/// One sampled execution step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceItem {
    pub source: TraceSource,
    pub pre_state: VarState,
    pub post_state: VarState,
}

impl TraceItem {
    pub fn new(source: TraceSource, pre_state: VarState, post_state: VarState) -> Self {
        Self {
            source,
            pre_state,
            post_state,
        }
    }
}

/// A contiguous slice of a trace that a sketch hole must explain.
///
/// Shared and cheap to clone; the enumerator fans a single recorded trace out
/// into many overlapping sub-traces.
pub type Subtrace = Arc<[TraceItem]>;

/// A full recorded execution of the obfuscated function on one input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub items: Vec<TraceItem>,
    /// Input arguments this trace was recorded under.
    pub inputs: Vec<String>,
    /// Observed return value token.
    pub ret_val: String,
}

impl Trace {
    pub fn new(items: Vec<TraceItem>, inputs: Vec<String>, ret_val: impl Into<String>) -> Self {
        Self {
            items,
            inputs,
            ret_val: ret_val.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn sources(&self) -> impl Iterator<Item = &TraceSource> {
        self.items.iter().map(|item| &item.source)
    }

    /// The whole trace as a sub-trace.
    pub fn as_subtrace(&self) -> Subtrace {
        Subtrace::from(self.items.as_slice())
    }

    /// Project the trace onto `min_vars`. See [`minimize`].
    pub fn minimized(
        &self,
        min_vars: &indexmap::IndexSet<String>,
        facts: &VarFacts,
        drop_unused_stmts: bool,
        restrict_states: bool,
    ) -> Option<Trace> {
        minimize(&self.items, min_vars, facts, drop_unused_stmts, restrict_states).map(|items| {
            Trace {
                items,
                inputs: self.inputs.clone(),
                ret_val: self.ret_val.clone(),
            }
        })
    }

    /// Whether every item's pre-state agrees with the state carried forward
    /// from the previous item on their shared keys.
    pub fn is_consistent(&self) -> bool {
        let Some(first) = self.items.first() else {
            return true;
        };
        let mut carried = &first.pre_state;
        for item in &self.items {
            let agrees = item
                .pre_state
                .iter()
                .all(|(k, v)| carried.get(k).is_none_or(|c| c == v));
            if !agrees {
                return false;
            }
            carried = &item.post_state;
        }
        true
    }

    /// Variables whose carried value ever disagrees with a recorded
    /// pre-state. Values recorded as `ERROR` (unreadable by the debugger) are
    /// not charged against the variable.
    pub fn inconsistent_vars(&self) -> indexmap::IndexSet<String> {
        let mut bad = indexmap::IndexSet::new();
        let Some(first) = self.items.first() else {
            return bad;
        };
        let mut carried = first.pre_state.clone();
        for item in &self.items {
            if carried != item.pre_state {
                let keys = carried.keys().chain(item.pre_state.keys());
                for k in keys {
                    if carried.get(k) != item.pre_state.get(k)
                        && carried.get(k).is_none_or(|v| v != "ERROR")
                    {
                        bad.insert(k.clone());
                    }
                }
            }
            carried = item.post_state.clone();
        }
        bad
    }
}

/// Project a run of trace items onto a variable set.
///
/// Items declaring variables outside the set are dropped. With
/// `drop_unused_stmts`, non-control-flow items that neither use nor declare a
/// surviving variable are dropped too (constant guards such as `1` carry no
/// variables but still anchor control flow, so they stay). Pre/post states
/// are restricted to the set when `restrict_states`; post-states never gain
/// keys that were neither live before nor just declared. Items left without
/// a required variable in either state are dropped. Returns `None` when no
/// item survives.
pub fn minimize(
    items: &[TraceItem],
    min_vars: &indexmap::IndexSet<String>,
    facts: &VarFacts,
    drop_unused_stmts: bool,
    restrict_states: bool,
) -> Option<Vec<TraceItem>> {
    let mut out = Vec::new();
    for item in items {
        let src = item.source.src.as_str();
        let declared = facts.declared_names(src);
        if declared.iter().any(|v| !min_vars.contains(*v)) {
            continue;
        }

        let used = facts.used(src);
        if drop_unused_stmts
            && !statement_has_control_flow(src)
            && used.iter().all(|v| !min_vars.contains(v))
            && declared.iter().all(|v| !min_vars.contains(*v))
            && src != "1"
        {
            continue;
        }

        let pre_state: VarState = item
            .pre_state
            .iter()
            .filter(|(k, _)| min_vars.contains(*k) || !restrict_states)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let post_state: VarState = item
            .post_state
            .iter()
            .filter(|(k, _)| {
                (min_vars.contains(*k) || !restrict_states)
                    && (pre_state.contains_key(*k) || declared.contains(k.as_str()))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let required: Vec<&String> = used
            .iter()
            .filter(|v| !declared.contains(v.as_str()))
            .collect();
        if required.iter().any(|v| !pre_state.contains_key(*v))
            || required.iter().any(|v| !post_state.contains_key(*v))
            || declared.iter().any(|v| !pre_state.contains_key(*v))
        {
            continue;
        }

        out.push(TraceItem {
            source: item.source.clone(),
            pre_state,
            post_state,
        });
    }
    if out.is_empty() { None } else { Some(out) }
}
