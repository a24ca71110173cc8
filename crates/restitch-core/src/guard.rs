//! Guard specifications for control-flow nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a multi-guard spec combines its members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardComposition {
    #[default]
    None,
    And,
    Or,
}

/// The guard of an `if`/`while` node: one or more source guard texts, an
/// overall polarity, and the composition operator for the multi-guard case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardSpec {
    pub guards: Vec<String>,
    pub negated: bool,
    pub composition: GuardComposition,
}

impl GuardSpec {
    pub fn single(guard: impl Into<String>, negated: bool) -> Self {
        Self {
            guards: vec![guard.into()],
            negated,
            composition: GuardComposition::None,
        }
    }

    pub fn compound<I, S>(guards: I, negated: bool, composition: GuardComposition) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let guards: Vec<String> = guards.into_iter().map(Into::into).collect();
        assert!(
            guards.len() < 2 || composition != GuardComposition::None,
            "compound guard needs a composition operator"
        );
        Self {
            guards,
            negated,
            composition,
        }
    }

    pub fn is_compound(&self) -> bool {
        self.guards.len() > 1
    }
}

impl fmt::Display for GuardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bang = if self.negated { "!" } else { "" };
        if let [single] = self.guards.as_slice() {
            if self.negated {
                return write!(f, "!({single})");
            }
            return write!(f, "{single}");
        }
        let op = match self.composition {
            GuardComposition::And => " && ",
            GuardComposition::Or => " || ",
            GuardComposition::None => unreachable!("compound guard without operator"),
        };
        write!(f, "(")?;
        for (i, g) in self.guards.iter().enumerate() {
            if i > 0 {
                write!(f, "{op}")?;
            }
            write!(f, "{bang}{g}")?;
        }
        write!(f, ")")
    }
}
