//! The fixed structured-program grammar.
//!
//! ```text
//! P -> Single(S) | Seq(S, P)
//! S -> If(Guard, P) | ITE(Guard, P, P) | While(Guard, P) | Stmt(Stmt)
//! Guard -> SourceGuard(spec)
//! Stmt  -> SourceStmt(text)
//! ```
//!
//! The grammar never changes, so productions are a closed enum with static
//! arity tables. What varies per search is the *terminal pool*: which
//! statement and guard texts, mined from the traces, may fill the leaves.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Grammar nonterminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nonterminal {
    /// A program: one statement or a sequence.
    P,
    /// A single construct: control flow or a statement.
    S,
    Guard,
    Stmt,
}

/// Production applied at a node. `Phantom` is not part of the surface
/// grammar: it is the stand-in used during phantom evaluation, holding the
/// raw statement texts of a hole's sub-traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProdKind {
    Single,
    Seq,
    If,
    Ite,
    While,
    Stmt,
    SourceGuard,
    SourceStmt,
    Phantom,
}

impl ProdKind {
    /// Nonterminal this production expands.
    pub fn nonterm(self) -> Nonterminal {
        match self {
            ProdKind::Single | ProdKind::Seq => Nonterminal::P,
            ProdKind::If | ProdKind::Ite | ProdKind::While | ProdKind::Stmt => Nonterminal::S,
            ProdKind::SourceGuard => Nonterminal::Guard,
            ProdKind::SourceStmt | ProdKind::Phantom => Nonterminal::Stmt,
        }
    }

    /// Child nonterminals, in order. Terminals have none.
    pub fn rhs(self) -> &'static [Nonterminal] {
        match self {
            ProdKind::Single => &[Nonterminal::S],
            ProdKind::Seq => &[Nonterminal::S, Nonterminal::P],
            ProdKind::If => &[Nonterminal::Guard, Nonterminal::P],
            ProdKind::Ite => &[Nonterminal::Guard, Nonterminal::P, Nonterminal::P],
            ProdKind::While => &[Nonterminal::Guard, Nonterminal::P],
            ProdKind::Stmt => &[Nonterminal::Stmt],
            ProdKind::SourceGuard | ProdKind::SourceStmt | ProdKind::Phantom => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rhs().is_empty()
    }

    /// Structural expansions of a nonterminal, excluding terminals.
    pub fn expansions(nonterm: Nonterminal) -> &'static [ProdKind] {
        match nonterm {
            Nonterminal::P => &[ProdKind::Single, ProdKind::Seq],
            Nonterminal::S => &[ProdKind::If, ProdKind::Ite, ProdKind::While, ProdKind::Stmt],
            Nonterminal::Guard | Nonterminal::Stmt => &[],
        }
    }

    /// Expansions available to the statement-sequence searcher: control-flow
    /// productions are the sketch enumerator's business.
    pub fn stmt_expansions(nonterm: Nonterminal) -> &'static [ProdKind] {
        match nonterm {
            Nonterminal::P => &[ProdKind::Single, ProdKind::Seq],
            Nonterminal::S => &[ProdKind::Stmt],
            Nonterminal::Guard | Nonterminal::Stmt => &[],
        }
    }
}

/// Statement and guard texts mined from the traces, i.e. the terminals the
/// search may place at leaves. Insertion order is enumeration order.
#[derive(Debug, Clone, Default)]
pub struct TerminalPool {
    pub stmts: IndexSet<String>,
    pub guards: IndexSet<String>,
}

impl TerminalPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stmts<I, S>(stmts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stmts: stmts.into_iter().map(Into::into).collect(),
            guards: IndexSet::new(),
        }
    }

    /// Number of terminals available for the given nonterminal.
    pub fn available(&self, nonterm: Nonterminal) -> usize {
        match nonterm {
            Nonterminal::Stmt => self.stmts.len(),
            Nonterminal::Guard => self.guards.len(),
            _ => usize::MAX,
        }
    }
}
