//! Basic blocks and the control-flow graph (spec.md §3, §4.1).
//!
//! Grounded on `gwcc/cfg.py` line-for-line: `BasicBlock`, `FlowEdge`,
//! `ControlFlowGraph`, the tri-color-DFS `postorder`/`topoorder`, and the
//! DOT exporter. Per spec.md §9's "cyclic CFG ownership" design note,
//! blocks are arena-held in a `Map<Id, BasicBlock>` owned by the graph and
//! referenced everywhere else by their stable `Id`, rather than by the
//! mutually-referential object graph the original uses; the original's
//! `ImmutableSet`-wrapped edge accessors become plain cloned `Set<Id>`
//! snapshots, since the borrow checker already prevents a caller from
//! mutating the graph's internal adjacency sets through a returned
//! reference.

use crate::common::{Id, Map, Set};
use crate::ir::stmt::Statement;

/// A named, ordered sequence of statements. Block-terminator invariant: at
/// most one control-flow statement, and if present it is the last
/// statement (spec.md §3); this invariant is enforced by
/// `Function::verify`, not by this type, so that a block under
/// construction may briefly violate it.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub name: Id,
    pub stmts: Vec<Statement>,
}

impl BasicBlock {
    pub fn new(name: Id) -> Self {
        BasicBlock { name, stmts: Vec::new() }
    }

    pub fn add_stmt(&mut self, stmt: Statement) {
        self.stmts.push(stmt);
    }

    pub fn pretty_print(&self) -> String {
        let mut result = format!("=== Block {} ===\n", self.name);
        for stmt in &self.stmts {
            result += &format!("{stmt}\n");
        }
        result
    }
}

impl std::fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A directed control-flow edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowEdge {
    pub src: Id,
    pub dst: Id,
}

impl FlowEdge {
    pub fn new(src: Id, dst: Id) -> Self {
        FlowEdge { src, dst }
    }
}

impl std::fmt::Display for FlowEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// A set of basic blocks, a distinguished entry, and a set of directed
/// edges with forward and reverse adjacency indexes.
#[derive(Clone, Debug, Default)]
pub struct ControlFlowGraph {
    pub blocks: Map<Id, BasicBlock>,
    edges: Map<Id, Set<Id>>,
    reverse_edges: Map<Id, Set<Id>>,
    pub entry: Option<Id>,
    next_id: usize,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        ControlFlowGraph::default()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Create a new, empty basic block named `L<n>`, and make it the
    /// entry if this is the first block created.
    pub fn new_block(&mut self) -> Id {
        let name = crate::common::id(format!("L{}", self.next_id));
        self.next_id += 1;
        self.blocks.insert(name, BasicBlock::new(name));
        self.edges.insert(name, Set::new());
        self.reverse_edges.insert(name, Set::new());
        if self.entry.is_none() {
            self.entry = Some(name);
        }
        name
    }

    /// Remove a block and every edge incident to it, on both sides of the
    /// adjacency index.
    pub fn remove_block(&mut self, bb: Id) {
        self.blocks.remove(&bb);
        if let Some(outgoing) = self.edges.remove(&bb) {
            for dst in outgoing {
                if let Some(set) = self.reverse_edges.get_mut(&dst) {
                    set.remove(&bb);
                }
            }
        }
        if let Some(incoming) = self.reverse_edges.remove(&bb) {
            for src in incoming {
                if let Some(set) = self.edges.get_mut(&src) {
                    set.remove(&bb);
                }
            }
        }
    }

    pub fn get_edges(&self, bb: Id) -> Set<Id> {
        self.edges.get(&bb).cloned().unwrap_or_default()
    }

    pub fn get_edges_to(&self, bb: Id) -> Set<Id> {
        self.reverse_edges.get(&bb).cloned().unwrap_or_default()
    }

    pub fn add_edge(&mut self, e: FlowEdge) {
        self.edges.entry(e.src).or_default().insert(e.dst);
        self.reverse_edges.entry(e.dst).or_default().insert(e.src);
    }

    pub fn remove_edge(&mut self, e: FlowEdge) {
        if let Some(set) = self.edges.get_mut(&e.src) {
            set.remove(&e.dst);
        }
        if let Some(set) = self.reverse_edges.get_mut(&e.dst) {
            set.remove(&e.src);
        }
    }

    pub fn has_edge(&self, src: Id, dst: Id) -> bool {
        self.edges.get(&src).map(|s| s.contains(&dst)).unwrap_or(false)
    }

    pub fn pretty_print(&self) -> String {
        let mut result = String::new();
        for bb in topoorder(self) {
            result += &self.blocks[&bb].pretty_print();
            for dst in self.get_edges(bb) {
                result += &format!("{}\n", FlowEdge::new(bb, dst));
            }
        }
        result
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// Iterative tri-color DFS post-order from the entry block. Unreachable
/// blocks are not emitted. Grounded on `gwcc/cfg.py`'s `postorder`.
pub fn postorder(cfg: &ControlFlowGraph) -> Vec<Id> {
    let mut order = Vec::new();
    let Some(entry) = cfg.entry else {
        return order;
    };
    if cfg.blocks.is_empty() {
        return order;
    }

    let mut coloring: Map<Id, Color> = Map::new();
    let mut stack = vec![entry];
    while let Some(&v) = stack.last() {
        match coloring.get(&v) {
            None => {
                coloring.insert(v, Color::Gray);
                for dst in cfg.get_edges(v) {
                    if !coloring.contains_key(&dst) {
                        stack.push(dst);
                    }
                }
            }
            Some(Color::Gray) => {
                coloring.insert(v, Color::Black);
                order.push(v);
            }
            Some(Color::Black) => {
                stack.pop();
            }
        }
    }
    order
}

/// Topological order: post-order reversed.
pub fn topoorder(cfg: &ControlFlowGraph) -> Vec<Id> {
    let mut order = postorder(cfg);
    order.reverse();
    order
}

fn dot_sanitize(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Render the CFG as a labeled DOT digraph, for external debugging tools.
/// Grounded on `gwcc/cfg.py`'s `dump_graph`.
pub fn to_dot(cfg: &ControlFlowGraph, name: &str) -> String {
    let mut out = format!("digraph \"{}\" {{\n", dot_sanitize(name));
    for bb in cfg.blocks.values() {
        let mut lines = vec![format!("== Block {} ==", bb.name)];
        lines.extend(bb.stmts.iter().map(|s| s.to_string()));
        let label = dot_sanitize(&lines.join("\\l"));
        out += &format!("    {} [shape=box, label=\"{}\"]\n", bb.name, label);
    }
    for bb in cfg.blocks.keys() {
        for dst in cfg.get_edges(*bb) {
            out += &format!("{} -> {};\n", bb, dst);
        }
    }
    out += "}\n";
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postorder_simple_diamond() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.new_block();
        let b = cfg.new_block();
        let c = cfg.new_block();
        let d = cfg.new_block();
        cfg.add_edge(FlowEdge::new(a, b));
        cfg.add_edge(FlowEdge::new(a, c));
        cfg.add_edge(FlowEdge::new(b, d));
        cfg.add_edge(FlowEdge::new(c, d));

        let topo = topoorder(&cfg);
        assert_eq!(topo[0], a);
        assert_eq!(*topo.last().unwrap(), d);
        assert_eq!(topo.len(), 4);
    }

    #[test]
    fn unreachable_blocks_are_not_emitted() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.new_block();
        let _unreachable = cfg.new_block();
        assert_eq!(postorder(&cfg), vec![a]);
    }

    #[test]
    fn remove_block_cleans_both_adjacency_indexes() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.new_block();
        let b = cfg.new_block();
        cfg.add_edge(FlowEdge::new(a, b));
        cfg.remove_block(b);
        assert!(cfg.get_edges(a).is_empty());
        assert!(!cfg.blocks.contains_key(&b));
    }

    #[test]
    fn topoorder_is_stable_across_reruns() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.new_block();
        let b = cfg.new_block();
        cfg.add_edge(FlowEdge::new(a, b));
        assert_eq!(topoorder(&cfg), topoorder(&cfg));
    }
}
