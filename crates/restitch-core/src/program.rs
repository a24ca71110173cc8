//! Arena representation of partial and complete structured programs.
//!
//! Nodes live in a flat vector indexed by [`NodeId`]; parent/children
//! relations are index tables owned by the program. Copying a program copies
//! the tables, never the search state around it. Open holes are tracked in
//! `unknowns` in creation order; an `Unknown` node *not* listed there is an
//! implicit statement hole owned by a sketch's statement map.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grammar::{Nonterminal, ProdKind};
use crate::guard::GuardSpec;

/// Index of a node in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Leaf payload of a terminal node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Guard(GuardSpec),
    Stmt(String),
    /// Raw statement texts standing in for an unsolved hole during phantom
    /// evaluation.
    Stmts(Vec<String>),
}

/// Node in the program tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Value {
        kind: ProdKind,
        payload: Option<Payload>,
    },
    Unknown {
        nonterm: Nonterminal,
    },
}

impl Node {
    pub fn kind(&self) -> Option<ProdKind> {
        match self {
            Node::Value { kind, .. } => Some(*kind),
            Node::Unknown { .. } => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Node::Unknown { .. })
    }

    pub fn guard_spec(&self) -> Option<&GuardSpec> {
        match self {
            Node::Value {
                payload: Some(Payload::Guard(spec)),
                ..
            } => Some(spec),
            _ => None,
        }
    }

    /// Leaf source texts of this node alone.
    pub fn codes(&self) -> &[String] {
        match self {
            Node::Value {
                payload: Some(Payload::Guard(spec)),
                ..
            } => &spec.guards,
            Node::Value {
                payload: Some(Payload::Stmt(s)),
                ..
            } => std::slice::from_ref(s),
            Node::Value {
                payload: Some(Payload::Stmts(ss)),
                ..
            } => ss,
            _ => &[],
        }
    }
}

/// A partial or complete structured program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    nodes: Vec<Option<Node>>,
    children: Vec<Vec<NodeId>>,
    parent: Vec<Option<NodeId>>,
    root: NodeId,
    unknowns: Vec<NodeId>,
    live: usize,
}

impl Program {
    /// A program that is a single open hole for `start`.
    pub fn new(start: Nonterminal) -> Self {
        let root = NodeId(0);
        Self {
            nodes: vec![Some(Node::Unknown { nonterm: start })],
            children: vec![Vec::new()],
            parent: vec![None],
            root,
            unknowns: vec![root],
            live: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.index()]
            .as_ref()
            .expect("reference to deleted node")
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.children[id.index()]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parent[id.index()]
    }

    /// Open holes, in creation order.
    pub fn unknowns(&self) -> &[NodeId] {
        &self.unknowns
    }

    /// Number of live nodes. The size-first search priority.
    pub fn node_count(&self) -> usize {
        self.live
    }

    /// Complete means no *open* holes; implicit statement holes may remain.
    pub fn is_complete(&self) -> bool {
        self.unknowns.is_empty()
    }

    /// Ids of every `Unknown` node left in the tree, open or implicit.
    pub fn unknown_nodes(&self) -> Vec<NodeId> {
        self.iter_ids()
            .filter(|id| self.node(*id).is_unknown())
            .collect()
    }

    /// All live node ids, ascending.
    pub fn iter_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| NodeId(i as u32)))
    }

    /// The first open hole in depth-first order, if any.
    pub fn leftmost_unknown(&self) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if self.unknowns.contains(&id) {
                return Some(id);
            }
            for &child in self.children(id).iter().rev() {
                stack.push(child);
            }
        }
        None
    }

    fn alloc(&mut self, node: Node, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        self.children.push(Vec::new());
        self.parent.push(parent);
        self.live += 1;
        if let Some(p) = parent {
            self.children[p.index()].push(id);
        }
        id
    }

    /// Expand the open hole `unk` with a production. Child nonterminals
    /// become fresh open holes, appended to `unknowns` in RHS order.
    /// Terminal productions must carry their payload.
    pub fn expand(&mut self, unk: NodeId, kind: ProdKind, payload: Option<Payload>) {
        let pos = self
            .unknowns
            .iter()
            .position(|&u| u == unk)
            .expect("expanding a node that is not an open hole");
        self.unknowns.remove(pos);
        assert!(self.node(unk).is_unknown(), "expanding a non-hole node");
        assert!(
            !kind.is_terminal() || payload.is_some(),
            "terminal production without payload"
        );

        self.nodes[unk.index()] = Some(Node::Value { kind, payload });
        for &nonterm in kind.rhs() {
            let child = self.alloc(Node::Unknown { nonterm }, Some(unk));
            self.unknowns.push(child);
        }
    }

    /// Drop an open hole from the worklist without touching the tree. The
    /// node becomes an implicit statement hole.
    pub fn release_unknown(&mut self, unk: NodeId) {
        let pos = self
            .unknowns
            .iter()
            .position(|&u| u == unk)
            .expect("releasing a node that is not an open hole");
        self.unknowns.remove(pos);
    }

    /// Re-register an `Unknown` node as an open hole.
    pub fn register_unknown(&mut self, id: NodeId) {
        assert!(self.node(id).is_unknown());
        if !self.unknowns.contains(&id) {
            self.unknowns.push(id);
        }
    }

    /// Replace an unknown or leaf node wholesale. The caller is responsible
    /// for keeping `unknowns` in sync via `release_unknown`/`register_unknown`.
    pub fn set_node(&mut self, id: NodeId, node: Node) {
        assert!(self.nodes[id.index()].is_some(), "setting a deleted node");
        self.nodes[id.index()] = Some(node);
    }

    /// Splice `sub` over the open hole `unk`. Returns the mapping from ids
    /// in `sub` to the ids they received here; `sub`'s open holes become
    /// open holes of this program, in `sub`'s order.
    pub fn graft(&mut self, unk: NodeId, sub: &Program) -> indexmap::IndexMap<NodeId, NodeId> {
        let pos = self
            .unknowns
            .iter()
            .position(|&u| u == unk)
            .expect("grafting over a node that is not an open hole");
        self.unknowns.remove(pos);

        let mut map = indexmap::IndexMap::new();
        map.insert(sub.root, unk);
        for id in sub.iter_ids() {
            if id == sub.root {
                continue;
            }
            let new_id = NodeId(self.nodes.len() as u32);
            self.nodes.push(None);
            self.children.push(Vec::new());
            self.parent.push(None);
            map.insert(id, new_id);
        }

        for id in sub.iter_ids() {
            let new_id = map[&id];
            self.nodes[new_id.index()] = Some(sub.node(id).clone());
            self.children[new_id.index()] =
                sub.children(id).iter().map(|c| map[c]).collect();
            if id != sub.root {
                self.live += 1;
                let p = sub.parent(id).expect("non-root without parent");
                self.parent[new_id.index()] = Some(map[&p]);
            }
        }

        for u in &sub.unknowns {
            self.unknowns.push(map[u]);
        }
        map
    }

    /// Delete the subtree rooted at `id`, unlinking it from its parent.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if let Some(p) = self.parent[id.index()] {
            self.children[p.index()].retain(|&c| c != id);
        }
        self.delete_owned(id);
    }

    /// Delete `id` and every descendant that still points at its deleter.
    /// The parent pointer decides ownership: a node whose parent was
    /// re-linked elsewhere (see [`Program::replace`]) survives.
    fn delete_owned(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let kids = std::mem::take(&mut self.children[n.index()]);
            for c in kids {
                if self.parent[c.index()] == Some(n) {
                    stack.push(c);
                }
            }
            if self.nodes[n.index()].take().is_some() {
                self.live -= 1;
            }
            self.parent[n.index()] = None;
            self.unknowns.retain(|&u| u != n);
        }
    }

    /// Replace the subtree at `old` with the node `new`, deleting what is
    /// left of `old`. `new` may be a descendant of `old`: re-pointing its
    /// parent link first keeps its subtree out of the deletion. If `old` was
    /// the root, `new` becomes the root.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        assert_ne!(old, new);
        match self.parent[old.index()] {
            Some(p) => {
                let slot = self.children[p.index()]
                    .iter()
                    .position(|&c| c == old)
                    .expect("child slot not found");
                self.children[p.index()][slot] = new;
                self.parent[new.index()] = Some(p);
            }
            None => {
                self.parent[new.index()] = None;
                self.root = new;
            }
        }
        self.delete_owned(old);
    }

    /// Wrap the node `id` in a fresh `Seq(?, id)`, opening a new `P` hole in
    /// front of it. Returns the id of the new hole.
    pub fn wrap_in_seq(&mut self, id: NodeId) -> NodeId {
        let parent = self.parent[id.index()];
        let seq = self.alloc(
            Node::Value {
                kind: ProdKind::Seq,
                payload: None,
            },
            None,
        );
        let hole = self.alloc(Node::Unknown { nonterm: Nonterminal::P }, Some(seq));
        if let Some(p) = parent {
            let slot = self.children[p.index()]
                .iter()
                .position(|&c| c == id)
                .expect("child slot not found");
            self.children[p.index()][slot] = seq;
            self.parent[seq.index()] = Some(p);
        } else {
            self.root = seq;
        }
        self.children[seq.index()].push(id);
        self.parent[id.index()] = Some(seq);
        self.unknowns.push(hole);
        hole
    }

    /// All leaf source texts, in depth-first order.
    pub fn codes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.extend(self.node(id).codes().iter().map(String::as_str));
            for &child in self.children(id).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Check the arena invariants, failing loudly on violation. Programmer
    /// errors only; never data-dependent.
    pub fn validate(&self) {
        for &u in &self.unknowns {
            assert!(
                self.node(u).is_unknown(),
                "open hole {u} is not an Unknown node"
            );
        }
        for id in self.iter_ids() {
            if let Node::Value { kind, .. } = self.node(id) {
                assert_eq!(
                    self.children(id).len(),
                    kind.rhs().len(),
                    "arity mismatch at {id} ({kind:?})"
                );
            }
            for &c in self.children(id) {
                assert_eq!(self.parent(c), Some(id), "parent link broken at {c}");
            }
        }
    }
}
