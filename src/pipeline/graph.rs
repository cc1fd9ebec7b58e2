//! Pipeline graph: nodes, edges and shape validation
//!
//! The graph is a tree rooted at a single [`Node::Source`]: every other node has
//! exactly one parent, and only [`Node::Branch`] nodes have more than one child.
//! Children are visited in the order their edges were added.

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use super::error::{PipelineError, PipelineResult};
use super::node::{FilterMode, Node};
use crate::models::ResolvedAction;

/// Node graph built once per request from a step's action list
#[derive(Debug, Clone)]
pub struct Pipeline {
    graph: DiGraph<Node, ()>,
    root: NodeIndex,
    actions: Vec<ResolvedAction>,
}

impl Pipeline {
    /// Graph holding only the source node
    pub fn new(actions: Vec<ResolvedAction>) -> Self {
        let mut graph = DiGraph::new();
        let root = graph.add_node(Node::Source);
        Self {
            graph,
            root,
            actions,
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn actions(&self) -> &[ResolvedAction] {
        &self.actions
    }

    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        self.graph.add_node(node)
    }

    pub fn connect(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }

    /// Add `node` as the next child of `parent`
    pub fn append(&mut self, parent: NodeIndex, node: Node) -> NodeIndex {
        let index = self.add_node(node);
        self.connect(parent, index);
        index
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Children of `index`, in edge insertion order
    pub fn children(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .collect();
        edges.sort_by_key(|(id, _)| id.index());
        edges.into_iter().map(|(_, target)| target).collect()
    }

    pub fn parents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .collect()
    }

    /// Sink nodes, in index order
    pub fn sinks(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|i| self.graph[*i].is_sink())
            .collect()
    }

    /// Statistics and invalid-detection nodes upstream of `node`, in graph order
    pub fn upstream_analyses(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let order = toposort(&self.graph, None).unwrap_or_default();
        order
            .into_iter()
            .filter(|i| *i != node && self.graph[*i].is_analysis())
            .filter(|i| has_path_connecting(&self.graph, *i, node, None))
            .collect()
    }

    /// Nodes sharing the source's schema: from the root, following each branch's
    /// first child
    pub fn main_lane(&self) -> Vec<NodeIndex> {
        let mut lane = vec![self.root];
        let mut current = self.root;
        while let Some(next) = self.children(current).first().copied() {
            lane.push(next);
            current = next;
        }
        lane
    }

    /// Whether some filter stops the run on its first rejected row
    pub fn has_interrupt_filter(&self) -> bool {
        self.graph.node_weights().any(|n| {
            matches!(
                n,
                Node::Filter {
                    mode: FilterMode::Interrupt,
                    ..
                }
            )
        })
    }

    /// Whether an analysis runs ahead of an action that reads its results
    ///
    /// Held statistics passes and invalid detection feeding a later action decide
    /// row outcomes from statistics over the whole input, which partitions cannot
    /// see.
    pub fn has_mid_pipeline_analysis(&self) -> bool {
        self.graph.node_indices().any(|index| match &self.graph[index] {
            Node::Statistics { hold_rows, .. } => *hold_rows,
            Node::InvalidDetection { .. } => self.graph.node_indices().any(|other| {
                matches!(self.graph[other], Node::Action { .. })
                    && has_path_connecting(&self.graph, index, other, None)
            }),
            _ => false,
        })
    }

    /// Whether partitioned runs produce the same rows and statistics as one ordered run
    pub fn is_partitionable(&self) -> bool {
        !self.has_interrupt_filter() && !self.has_mid_pipeline_analysis()
    }

    /// Node names in depth-first order from the root
    pub fn describe(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(self.node_count());
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            names.push(self.graph[index].name());
            stack.extend(self.children(index).into_iter().rev());
        }
        names
    }

    /// Check the graph is a tree rooted at the source and that every action node
    /// has its compile node upstream
    pub fn validate(&self) -> PipelineResult<()> {
        if is_cyclic_directed(&self.graph) {
            return Err(PipelineError::invalid_graph("cycle detected"));
        }
        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let parents = self.parents(index).len();
            if index == self.root {
                if parents != 0 {
                    return Err(PipelineError::invalid_graph("source node has a parent"));
                }
            } else {
                if matches!(node, Node::Source) {
                    return Err(PipelineError::invalid_graph("more than one source node"));
                }
                if parents != 1 {
                    return Err(PipelineError::invalid_graph(format!(
                        "{} node #{} has {} parents",
                        node.name(),
                        index.index(),
                        parents
                    )));
                }
            }
            if !matches!(node, Node::Branch) && self.children(index).len() > 1 {
                return Err(PipelineError::invalid_graph(format!(
                    "{} node #{} fans out without a branch",
                    node.name(),
                    index.index()
                )));
            }
            match node {
                Node::Compile { action_index } => self.check_action_index(*action_index)?,
                Node::Action { action_index } => {
                    self.check_action_index(*action_index)?;
                    let compiled = self.graph.node_indices().any(|i| {
                        matches!(self.graph[i], Node::Compile { action_index: a } if a == *action_index)
                            && has_path_connecting(&self.graph, i, index, None)
                    });
                    if !compiled {
                        return Err(PipelineError::invalid_graph(format!(
                            "action #{action_index} has no compile node upstream"
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_action_index(&self, action_index: usize) -> PipelineResult<()> {
        if action_index >= self.actions.len() {
            return Err(PipelineError::invalid_graph(format!(
                "action #{action_index} out of range ({} actions)",
                self.actions.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::models::Action;

    fn uppercase() -> Vec<ResolvedAction> {
        let registry = ActionRegistry::with_builtins();
        vec![
            registry
                .resolve(&Action::on_column("uppercase", "0000"))
                .unwrap(),
        ]
    }

    #[test]
    fn test_linear_graph_is_valid() {
        let mut pipeline = Pipeline::new(uppercase());
        let compile = pipeline.append(pipeline.root(), Node::Compile { action_index: 0 });
        let action = pipeline.append(compile, Node::Action { action_index: 0 });
        pipeline.append(action, Node::Limit { limit: 1 });
        pipeline.validate().unwrap();
        assert_eq!(pipeline.describe(), vec!["source", "compile", "action", "limit"]);
    }

    #[test]
    fn test_fan_out_requires_branch() {
        let mut pipeline = Pipeline::new(Vec::new());
        let root = pipeline.root();
        pipeline.append(root, Node::Limit { limit: 1 });
        pipeline.append(root, Node::Limit { limit: 2 });
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_branch_children_keep_insertion_order() {
        let mut pipeline = Pipeline::new(Vec::new());
        let branch = pipeline.append(pipeline.root(), Node::Branch);
        let first = pipeline.append(branch, Node::Limit { limit: 1 });
        let second = pipeline.append(branch, Node::Limit { limit: 2 });
        pipeline.validate().unwrap();
        assert_eq!(pipeline.children(branch), vec![first, second]);
        assert_eq!(pipeline.main_lane(), vec![pipeline.root(), branch, first]);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut pipeline = Pipeline::new(Vec::new());
        let a = pipeline.append(pipeline.root(), Node::Limit { limit: 1 });
        let b = pipeline.append(a, Node::Limit { limit: 1 });
        pipeline.connect(b, a);
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_action_needs_compile_upstream() {
        let mut pipeline = Pipeline::new(uppercase());
        pipeline.append(pipeline.root(), Node::Action { action_index: 0 });
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("compile"));

        let mut pipeline = Pipeline::new(Vec::new());
        pipeline.append(pipeline.root(), Node::Compile { action_index: 3 });
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_invalid_detection_only_matters_before_an_action() {
        let filter = crate::profiler::ColumnFilter::default();

        let mut trailing = Pipeline::new(uppercase());
        let compile = trailing.append(trailing.root(), Node::Compile { action_index: 0 });
        let action = trailing.append(compile, Node::Action { action_index: 0 });
        trailing.append(action, Node::InvalidDetection { filter: filter.clone() });
        assert!(!trailing.has_mid_pipeline_analysis());
        assert!(trailing.is_partitionable());

        let mut leading = Pipeline::new(uppercase());
        let invalid = leading.append(leading.root(), Node::InvalidDetection { filter });
        let compile = leading.append(invalid, Node::Compile { action_index: 0 });
        leading.append(compile, Node::Action { action_index: 0 });
        assert!(leading.has_mid_pipeline_analysis());
        assert!(!leading.is_partitionable());
    }
}
