//! Executed source lines as they appear in traces.
//!
//! A [`TraceSource`] is one source line the debugger stepped over: its text,
//! whether it is a guard or a statement, the observed truth value (guards
//! only) and the line number. Matching between a pattern source (usually
//! projected, with no line/value) and a recorded occurrence is *fuzzy*:
//! absent fields match anything.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of an executed source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Guard,
    Statement,
}

/// One executed source line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceSource {
    /// Source text, e.g. `x = x - 1;` or `n > 0`.
    pub src: String,
    pub kind: SourceKind,
    /// Observed truth value. Only ever set for guards.
    pub val: Option<bool>,
    /// Line number in the obfuscated source, when known.
    pub line: Option<u32>,
}

impl TraceSource {
    pub fn guard(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            kind: SourceKind::Guard,
            val: None,
            line: None,
        }
    }

    pub fn stmt(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            kind: SourceKind::Statement,
            val: None,
            line: None,
        }
    }

    /// Same source with the given observed truth value.
    pub fn with_val(mut self, val: bool) -> Self {
        self.val = Some(val);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Projection used when comparing guard occurrences across traces.
    pub fn without_val(&self) -> Self {
        Self {
            val: None,
            ..self.clone()
        }
    }

    /// Projection down to text and kind.
    pub fn without_line_and_val(&self) -> Self {
        Self {
            val: None,
            line: None,
            ..self.clone()
        }
    }

    /// Fuzzy match: text and kind must agree; value and line must agree
    /// unless either side leaves them unset.
    pub fn matches(&self, other: &TraceSource) -> bool {
        self.src == other.src
            && self.kind == other.kind
            && (self.val == other.val || self.val.is_none() || other.val.is_none())
            && (self.line == other.line || self.line.is_none() || other.line.is_none())
    }

    /// For a guard written as `!g` or `!(g)`, the positive form with the
    /// observed value flipped. `None` for statements and positive guards.
    pub fn try_negate(&self) -> Option<TraceSource> {
        if self.kind != SourceKind::Guard {
            return None;
        }
        let inner = self.src.strip_prefix('!')?;
        let inner = inner
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(inner);
        Some(Self {
            src: inner.to_owned(),
            kind: SourceKind::Guard,
            val: self.val.map(|v| !v),
            line: self.line,
        })
    }

    pub fn is_return(&self) -> bool {
        statement_is_return(&self.src)
    }

    pub fn is_break(&self) -> bool {
        statement_is_break(&self.src)
    }
}

impl fmt::Display for TraceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SourceKind::Guard => {
                write!(f, "{}?", self.src)?;
                if let Some(line) = self.line {
                    write!(f, " ({line})")?;
                }
                if let Some(val) = self.val {
                    write!(f, ", {val}")?;
                }
                Ok(())
            }
            SourceKind::Statement => {
                write!(f, "{}", self.src)?;
                if let Some(line) = self.line {
                    write!(f, " ({line})")?;
                }
                Ok(())
            }
        }
    }
}

pub fn statement_is_return(src: &str) -> bool {
    src.trim_start().starts_with("return")
}

pub fn statement_is_break(src: &str) -> bool {
    src.trim() == "break;"
}

pub fn statement_has_control_flow(src: &str) -> bool {
    statement_is_return(src) || statement_is_break(src) || src.trim() == "continue;"
}
