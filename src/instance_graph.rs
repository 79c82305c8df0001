//! Instance graph: which module instantiates which.
//!
//! Nodes are modules, edges are instantiation sites (an edge from P to C
//! for every instance of C inside P's body, including bodies of layer
//! blocks). The graph is rebuilt on demand from the circuit; passes must
//! not mutate instantiation sites while holding one.

use crate::mir::{Circuit, ModuleId, Operation};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashSet;

/// One instantiation site: the instantiating module plus the op-index path
/// to the instance inside its body (one index per nesting level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSite {
    /// The module containing the instance
    pub parent: ModuleId,
    /// Indices from the module body down to the instance op
    pub path: Vec<usize>,
}

/// The module-instantiates-module graph of one circuit.
#[derive(Debug)]
pub struct InstanceGraph {
    graph: DiGraph<ModuleId, InstanceSite>,
    nodes: IndexMap<ModuleId, NodeIndex>,
}

impl InstanceGraph {
    /// Build the graph from a circuit.
    pub fn build(circuit: &Circuit) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = IndexMap::new();
        for module in &circuit.modules {
            let idx = graph.add_node(module.id);
            nodes.insert(module.id, idx);
        }
        for module in &circuit.modules {
            let parent = nodes[&module.id];
            let mut path = Vec::new();
            collect_edges(&module.body, module.id, parent, &mut path, &nodes, &mut graph);
        }
        Self { graph, nodes }
    }

    /// Every instantiation site of a module.
    pub fn uses(&self, module: ModuleId) -> Vec<&InstanceSite> {
        let Some(&node) = self.nodes.get(&module) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| e.weight())
            .collect()
    }

    /// The distinct modules that directly instantiate a module, in site
    /// order.
    pub fn parents(&self, module: ModuleId) -> Vec<ModuleId> {
        let Some(&node) = self.nodes.get(&module) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut parents = Vec::new();
        for edge in self.graph.edges_directed(node, Direction::Incoming) {
            let parent = self.graph[edge.source()];
            if seen.insert(parent) {
                parents.push(parent);
            }
        }
        parents
    }

    /// Whether the instantiation relation contains a cycle.
    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Visit every module so that each module is yielded only after every
    /// module that instantiates it, directly or transitively.
    ///
    /// This is a post-order traversal of the inverse (callee-to-caller)
    /// graph started from every node in turn, with a visited set shared
    /// across the starts so each module is yielded exactly once.
    pub fn inverse_post_order(&self) -> Vec<ModuleId> {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for &start in self.nodes.values() {
            if !visited.insert(start) {
                continue;
            }
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> =
                vec![(start, self.predecessors(start))];
            while let Some((node, preds)) = stack.last_mut() {
                match preds.pop() {
                    Some(pred) => {
                        if visited.insert(pred) {
                            let next = self.predecessors(pred);
                            stack.push((pred, next));
                        }
                    }
                    None => {
                        order.push(self.graph[*node]);
                        stack.pop();
                    }
                }
            }
        }
        order
    }

    fn predecessors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(node, Direction::Incoming)
            .collect()
    }
}

fn collect_edges(
    body: &[Operation],
    parent_id: ModuleId,
    parent: NodeIndex,
    path: &mut Vec<usize>,
    nodes: &IndexMap<ModuleId, NodeIndex>,
    graph: &mut DiGraph<ModuleId, InstanceSite>,
) {
    for (i, op) in body.iter().enumerate() {
        path.push(i);
        match op {
            Operation::Instance(inst) => {
                if let Some(&target) = nodes.get(&inst.module) {
                    graph.add_edge(
                        parent,
                        target,
                        InstanceSite {
                            parent: parent_id,
                            path: path.clone(),
                        },
                    );
                }
            }
            Operation::LayerBlock(block) => {
                collect_edges(&block.body, parent_id, parent, path, nodes, graph);
            }
            _ => {}
        }
        path.pop();
    }
}
