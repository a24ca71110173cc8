//! Program rendering.
//!
//! Two forms: the *compact* constructor form (`Seq(While(SourceGuard(n > 0),
//! ...), ...)`) used as the canonical memoization key, and C-like text for
//! human consumption. Both are deterministic functions of the tree, so equal
//! renderings mean equal programs.

use std::fmt;

use crate::frontend::FunctionSignature;
use crate::grammar::{Nonterminal, ProdKind};
use crate::program::{Node, NodeId, Payload, Program};

impl fmt::Display for Nonterminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Nonterminal::P => "P",
            Nonterminal::S => "S",
            Nonterminal::Guard => "Guard",
            Nonterminal::Stmt => "Stmt",
        };
        f.write_str(name)
    }
}

/// Canonical compact form, the cache key of the enumerative searcher.
pub fn format_compact(prog: &Program) -> String {
    let mut out = String::new();
    write_compact(prog, prog.root(), &mut out);
    out
}

fn write_compact(prog: &Program, id: NodeId, out: &mut String) {
    match prog.node(id) {
        Node::Unknown { nonterm } => {
            out.push_str(&format!("?[{nonterm}]"));
        }
        Node::Value { kind, payload } => match payload {
            Some(Payload::Guard(spec)) => {
                out.push_str(&format!("SourceGuard({spec})"));
            }
            Some(Payload::Stmt(s)) => {
                out.push_str(&format!("SourceStmt({s})"));
            }
            Some(Payload::Stmts(ss)) => {
                out.push_str(&format!("Stmts[{}]", ss.join(" ")));
            }
            None => {
                let name = match kind {
                    ProdKind::Single => "Single",
                    ProdKind::Seq => "Seq",
                    ProdKind::If => "If",
                    ProdKind::Ite => "ITE",
                    ProdKind::While => "While",
                    ProdKind::Stmt => "Stmt",
                    _ => unreachable!("terminal without payload"),
                };
                out.push_str(name);
                out.push('(');
                for (i, &child) in prog.children(id).iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_compact(prog, child, out);
                }
                out.push(')');
            }
        },
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_compact(self))
    }
}

const INDENT: &str = "  ";

/// Render the program body as C-like text, statements verbatim.
pub fn format_c(prog: &Program) -> String {
    let mut lines = Vec::new();
    write_c(prog, prog.root(), 0, &mut lines);
    lines.join("\n")
}

/// Render a full function: signature line, body, closing brace.
pub fn format_function(prog: &Program, sig: &FunctionSignature) -> String {
    let params: Vec<&str> = sig.params.iter().map(|p| p.decl.as_str()).collect();
    let mut lines = vec![format!(
        "{} {}({}) {{",
        sig.return_type,
        sig.name,
        params.join(", ")
    )];
    write_c(prog, prog.root(), 1, &mut lines);
    lines.push("}".to_owned());
    lines.join("\n")
}

fn guard_text(prog: &Program, guard: NodeId) -> String {
    prog.node(guard)
        .guard_spec()
        .expect("guard slot without guard payload")
        .to_string()
}

fn write_c(prog: &Program, id: NodeId, depth: usize, lines: &mut Vec<String>) {
    let pad = INDENT.repeat(depth);
    match prog.node(id) {
        Node::Unknown { nonterm } => lines.push(format!("{pad}?[{nonterm}]")),
        Node::Value { kind, payload } => match (kind, payload) {
            (_, Some(Payload::Stmt(s))) => lines.push(format!("{pad}{s}")),
            (_, Some(Payload::Stmts(ss))) => {
                lines.extend(ss.iter().map(|s| format!("{pad}{s}")));
            }
            (_, Some(Payload::Guard(_))) => {
                // Guards render inline in their parent's header.
            }
            (ProdKind::Single | ProdKind::Stmt, None) => {
                write_c(prog, prog.children(id)[0], depth, lines);
            }
            (ProdKind::Seq, None) => {
                write_c(prog, prog.children(id)[0], depth, lines);
                write_c(prog, prog.children(id)[1], depth, lines);
            }
            (ProdKind::If, None) => {
                let &[guard, body] = prog.children(id) else {
                    unreachable!("If arity");
                };
                lines.push(format!("{pad}if ({}) {{", guard_text(prog, guard)));
                write_c(prog, body, depth + 1, lines);
                lines.push(format!("{pad}}}"));
            }
            (ProdKind::Ite, None) => {
                let &[guard, then_p, else_p] = prog.children(id) else {
                    unreachable!("ITE arity");
                };
                lines.push(format!("{pad}if ({}) {{", guard_text(prog, guard)));
                write_c(prog, then_p, depth + 1, lines);
                lines.push(format!("{pad}}} else {{"));
                write_c(prog, else_p, depth + 1, lines);
                lines.push(format!("{pad}}}"));
            }
            (ProdKind::While, None) => {
                let &[guard, body] = prog.children(id) else {
                    unreachable!("While arity");
                };
                lines.push(format!("{pad}while ({}) {{", guard_text(prog, guard)));
                write_c(prog, body, depth + 1, lines);
                lines.push(format!("{pad}}}"));
            }
            _ => unreachable!("malformed node"),
        },
    }
}
