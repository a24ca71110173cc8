//! Trace and job fixtures shared across the synthesis tests.
//!
//! Traces are built the way the trace producer would record them: a rolling
//! variable state, one item per executed line, guards carrying their
//! observed truth value.

use restitch_core::frontend::{FunctionSignature, Param};
use restitch_core::source::TraceSource;
use restitch_core::trace::{Subtrace, Trace, TraceItem, VarState};
use restitch_core::VarFacts;

use crate::driver::Job;

pub struct TraceBuilder {
    state: VarState,
    items: Vec<TraceItem>,
    inputs: Vec<String>,
}

impl TraceBuilder {
    pub fn new(inputs: &[i64], vars: &[(&str, i64)]) -> Self {
        Self {
            state: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            items: Vec::new(),
            inputs: inputs.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn guard(mut self, src: &str, val: bool) -> Self {
        self.items.push(TraceItem::new(
            TraceSource::guard(src).with_val(val),
            self.state.clone(),
            self.state.clone(),
        ));
        self
    }

    /// A statement that leaves the state unchanged (e.g. `return x;`).
    pub fn stmt(mut self, src: &str) -> Self {
        self.items.push(TraceItem::new(
            TraceSource::stmt(src),
            self.state.clone(),
            self.state.clone(),
        ));
        self
    }

    /// A statement that writes the given variables.
    pub fn assign(mut self, src: &str, writes: &[(&str, i64)]) -> Self {
        let pre = self.state.clone();
        for (var, val) in writes {
            self.state.insert(var.to_string(), val.to_string());
        }
        self.items.push(TraceItem::new(
            TraceSource::stmt(src),
            pre,
            self.state.clone(),
        ));
        self
    }

    /// A dead store: the item's post-state shows the write, but the rest of
    /// the trace never sees it. This is how injected dead code looks under
    /// the debugger.
    pub fn dead_assign(mut self, src: &str, writes: &[(&str, i64)]) -> Self {
        let pre = self.state.clone();
        let mut post = self.state.clone();
        for (var, val) in writes {
            post.insert(var.to_string(), val.to_string());
        }
        self.items
            .push(TraceItem::new(TraceSource::stmt(src), pre, post));
        self
    }

    pub fn build(self, ret_val: &str) -> Trace {
        Trace::new(self.items, self.inputs, ret_val)
    }
}

pub fn subtraces(traces: &[Trace]) -> Vec<Subtrace> {
    traces.iter().map(Trace::as_subtrace).collect()
}

pub fn int_signature(name: &str, params: &[&str]) -> FunctionSignature {
    FunctionSignature {
        name: name.to_owned(),
        return_type: "int".to_owned(),
        params: params
            .iter()
            .map(|p| Param {
                name: p.to_string(),
                ty: "int".to_owned(),
                decl: format!("int {p}"),
            })
            .collect(),
    }
}

/// `if (x > 0) { y = 1; } return y;` on inputs 1 and -1.
pub fn pure_if_job() -> Job {
    let mut facts = VarFacts::new();
    facts.record_used("x > 0", ["x"]);
    facts.record_used("y = 1;", ["y"]);
    facts.record_written("y = 1;", ["y"]);
    facts.record_used("return y;", ["y"]);

    let taken = TraceBuilder::new(&[1], &[("x", 1), ("y", 0)])
        .guard("x > 0", true)
        .assign("y = 1;", &[("y", 1)])
        .stmt("return y;")
        .build("1");
    let skipped = TraceBuilder::new(&[-1], &[("x", -1), ("y", 0)])
        .guard("x > 0", false)
        .stmt("return y;")
        .build("0");

    Job {
        traces: vec![taken, skipped],
        facts,
        signature: int_signature("clamp_flag", &["x"]),
    }
}

/// `while (n > 0) { n = n - 1; } return n;` on inputs 3 and 1.
pub fn countdown_job() -> Job {
    let mut facts = VarFacts::new();
    facts.record_used("n > 0", ["n"]);
    facts.record_used("n = n - 1;", ["n"]);
    facts.record_written("n = n - 1;", ["n"]);
    facts.record_used("return n;", ["n"]);

    let traces = [3i64, 1]
        .iter()
        .map(|&n| {
            let mut b = TraceBuilder::new(&[n], &[("n", n)]);
            for v in (0..n).rev() {
                b = b.guard("n > 0", true).assign("n = n - 1;", &[("n", v)]);
            }
            b.guard("n > 0", false).stmt("return n;").build("0")
        })
        .collect();

    Job {
        traces,
        facts,
        signature: int_signature("countdown", &["n"]),
    }
}

/// `if (x == 0) return 0; else return 1;` on inputs 0 and 5.
pub fn early_return_job() -> Job {
    let mut facts = VarFacts::new();
    facts.record_used("x == 0", ["x"]);

    let zero = TraceBuilder::new(&[0], &[("x", 0)])
        .guard("x == 0", true)
        .stmt("return 0;")
        .build("0");
    let nonzero = TraceBuilder::new(&[5], &[("x", 5)])
        .guard("x == 0", false)
        .stmt("return 1;")
        .build("1");

    Job {
        traces: vec![zero, nonzero],
        facts,
        signature: int_signature("is_nonzero", &["x"]),
    }
}

/// `while (i < n && i < m) { i = i + 1; } return i;` with one trace exiting
/// through each conjunct.
pub fn conjunction_job() -> Job {
    let mut facts = VarFacts::new();
    facts.record_used("i < n", ["i", "n"]);
    facts.record_used("i < m", ["i", "m"]);
    facts.record_used("i = i + 1;", ["i"]);
    facts.record_written("i = i + 1;", ["i"]);
    facts.record_used("return i;", ["i"]);

    // n binds: two iterations, exit on i < n.
    let exit_left = TraceBuilder::new(&[2, 5], &[("i", 0), ("n", 2), ("m", 5)])
        .guard("i < n", true)
        .guard("i < m", true)
        .assign("i = i + 1;", &[("i", 1)])
        .guard("i < n", true)
        .guard("i < m", true)
        .assign("i = i + 1;", &[("i", 2)])
        .guard("i < n", false)
        .stmt("return i;")
        .build("2");
    // m binds: one iteration, exit on i < m.
    let exit_right = TraceBuilder::new(&[5, 1], &[("i", 0), ("n", 5), ("m", 1)])
        .guard("i < n", true)
        .guard("i < m", true)
        .assign("i = i + 1;", &[("i", 1)])
        .guard("i < n", true)
        .guard("i < m", false)
        .stmt("return i;")
        .build("1");

    Job {
        traces: vec![exit_left, exit_right],
        facts,
        signature: int_signature("bounded_walk", &["n", "m"]),
    }
}

/// The countdown with an injected dead branch in front: a guard over the
/// irrelevant `z` and a store the rest of the trace never observes.
pub fn deadcode_countdown_job() -> Job {
    let mut job = countdown_job();
    job.facts.record_used("z < 10", ["z"]);
    job.facts.record_used("z = z + 1;", ["z"]);
    job.facts.record_written("z = z + 1;", ["z"]);

    let traces = [3i64, 1]
        .iter()
        .map(|&n| {
            let mut b = TraceBuilder::new(&[n], &[("n", n), ("z", 0)])
                .guard("z < 10", true)
                .dead_assign("z = z + 1;", &[("z", 1)]);
            for v in (0..n).rev() {
                b = b.guard("n > 0", true).assign("n = n - 1;", &[("n", v)]);
            }
            b.guard("n > 0", false).stmt("return n;").build("0")
        })
        .collect();
    job.traces = traces;
    job
}
