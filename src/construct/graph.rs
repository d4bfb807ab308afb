//! Resource Dependency Tracking
//!
//! This module builds the dependency graph of every resource in an app.
//! Edges point from a dependency to its dependent, so a topological sort
//! yields a valid creation order. This enables:
//!
//! - Deployment ordering of stacks
//! - Cycle detection
//! - Dependency visualization

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use super::app::App;
use crate::error::{Error, Result};

/// A node in the dependency graph representing a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Unique id: `{stack}/{logical_id}`
    pub id: String,
    /// Owning stack
    pub stack: String,
    /// Logical ID inside the stack
    pub logical_id: String,
    /// CloudFormation resource type
    pub resource_type: String,
}

impl ResourceNode {
    /// Create a new resource node
    pub fn new(
        stack: impl Into<String>,
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        let stack = stack.into();
        let logical_id = logical_id.into();
        Self {
            id: node_id(&stack, &logical_id),
            stack,
            logical_id,
            resource_type: resource_type.into(),
        }
    }
}

fn node_id(stack: &str, logical_id: &str) -> String {
    format!("{}/{}", stack, logical_id)
}

/// Why one resource depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    /// `Ref` or `Fn::GetAtt` inside one stack
    Reference,
    /// Explicit `DependsOn`
    Explicit,
    /// Reference resolved through an export/import pair
    CrossStack,
}

/// A dependency between two resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDependency {
    /// Node that must exist first
    pub from_id: String,
    /// Node that depends on it
    pub to_id: String,
    /// Kind of dependency
    pub kind: DependencyKind,
    /// Attribute used, if any
    pub attribute: Option<String>,
}

/// The dependency graph for resource relationships
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceNode, ResourceDependency>,
    node_indices: HashMap<String, NodeIndex>,
    stack_order: Vec<String>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for every stack in `app`.
    pub fn from_app(app: &App) -> Result<Self> {
        let mut graph = Self::new();

        for stack in app.stacks() {
            graph.stack_order.push(stack.id().to_string());
            for resource in stack.resources() {
                graph.add_node(ResourceNode::new(
                    stack.id(),
                    &resource.logical_id,
                    &resource.resource_type,
                ));
            }
        }

        for stack in app.stacks() {
            for resource in stack.resources() {
                let to_id = node_id(stack.id(), &resource.logical_id);

                for reference in resource.properties.references() {
                    let kind = if reference.stack == stack.id() {
                        DependencyKind::Reference
                    } else {
                        DependencyKind::CrossStack
                    };
                    graph.add_dependency(ResourceDependency {
                        from_id: node_id(&reference.stack, &reference.logical_id),
                        to_id: to_id.clone(),
                        kind,
                        attribute: reference.attribute.clone(),
                    })?;
                }

                for dependency in &resource.depends_on {
                    graph.add_dependency(ResourceDependency {
                        from_id: node_id(stack.id(), dependency),
                        to_id: to_id.clone(),
                        kind: DependencyKind::Explicit,
                        attribute: None,
                    })?;
                }
            }
        }

        Ok(graph)
    }

    /// Add a node to the graph, replacing any node with the same id
    pub fn add_node(&mut self, node: ResourceNode) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(&node.id) {
            if let Some(existing) = self.graph.node_weight_mut(idx) {
                *existing = node;
            }
            return idx;
        }

        if !self.stack_order.contains(&node.stack) {
            self.stack_order.push(node.stack.clone());
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_indices.insert(id, idx);
        idx
    }

    /// Add a dependency between two existing nodes.
    ///
    /// Repeated references with the same kind and attribute collapse into one edge.
    pub fn add_dependency(&mut self, dependency: ResourceDependency) -> Result<()> {
        let from_idx = self.index_of(&dependency.from_id)?;
        let to_idx = self.index_of(&dependency.to_id)?;

        let duplicate = self.graph.edges_connecting(from_idx, to_idx).any(|e| {
            e.weight().kind == dependency.kind && e.weight().attribute == dependency.attribute
        });
        if !duplicate {
            self.graph.add_edge(from_idx, to_idx, dependency);
        }
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<NodeIndex> {
        self.node_indices.get(id).copied().ok_or_else(|| {
            let (stack, logical_id) = id.split_once('/').unwrap_or(("", id));
            Error::UnresolvedReference {
                stack: stack.to_string(),
                logical_id: logical_id.to_string(),
            }
        })
    }

    /// Resource ids on each dependency cycle
    pub fn cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut ids: Vec<String> = scc
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.id.clone()))
                    .collect();
                ids.sort();
                ids
            })
            .collect()
    }

    /// Resource creation order respecting every dependency.
    ///
    /// Fails with [`Error::DependencyCycle`] naming the resources on a cycle.
    pub fn resource_order(&self) -> Result<Vec<String>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.id.clone()))
                .collect()),
            Err(_) => {
                let cycle = self.cycles().into_iter().next().unwrap_or_default();
                Err(Error::DependencyCycle(format!(
                    "resources depend on each other: {}",
                    cycle.join(" <-> ")
                )))
            }
        }
    }

    /// Stacks that `stack` imports from, directly.
    pub fn stack_dependencies(&self, stack: &str) -> Vec<String> {
        let mut producers = BTreeSet::new();
        for edge in self.graph.edge_references() {
            if edge.weight().kind != DependencyKind::CrossStack {
                continue;
            }
            let (Some(from), Some(to)) = (
                self.graph.node_weight(edge.source()),
                self.graph.node_weight(edge.target()),
            ) else {
                continue;
            };
            if to.stack == stack && from.stack != stack {
                producers.insert(from.stack.clone());
            }
        }
        producers.into_iter().collect()
    }

    /// Stack deployment order.
    ///
    /// Producers come before their consumers; unrelated stacks keep the
    /// order they were added in.
    pub fn stack_order(&self) -> Result<Vec<String>> {
        let deps: HashMap<&str, Vec<String>> = self
            .stack_order
            .iter()
            .map(|s| (s.as_str(), self.stack_dependencies(s)))
            .collect();

        let mut placed: Vec<String> = Vec::with_capacity(self.stack_order.len());
        let mut remaining: Vec<&String> = self.stack_order.iter().collect();

        while !remaining.is_empty() {
            let next = remaining.iter().position(|s| {
                deps[s.as_str()]
                    .iter()
                    .all(|d| placed.iter().any(|p| p == d))
            });
            match next {
                Some(pos) => placed.push(remaining.remove(pos).clone()),
                None => {
                    let names: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();
                    return Err(Error::DependencyCycle(format!(
                        "stacks depend on each other: {}",
                        names.join(" <-> ")
                    )));
                }
            }
        }

        Ok(placed)
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges, in insertion order
    pub fn dependencies(&self) -> Vec<ResourceDependency> {
        self.graph
            .edge_references()
            .map(|e| e.weight().clone())
            .collect()
    }

    /// Generate a DOT format representation for visualization
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph dependencies {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        for stack in &self.stack_order {
            output.push_str(&format!(
                "  subgraph \"cluster_{}\" {{\n    label=\"{}\";\n",
                stack, stack
            ));
            for idx in self.graph.node_indices() {
                if let Some(node) = self.graph.node_weight(idx) {
                    if &node.stack == stack {
                        let label = format!("{}\\n{}", node.logical_id, node.resource_type);
                        output.push_str(&format!("    \"{}\" [label=\"{}\"];\n", node.id, label));
                    }
                }
            }
            output.push_str("  }\n");
        }

        output.push('\n');

        for edge in self.graph.edge_references() {
            let source = self
                .graph
                .node_weight(edge.source())
                .map(|n| n.id.as_str())
                .unwrap_or("?");
            let target = self
                .graph
                .node_weight(edge.target())
                .map(|n| n.id.as_str())
                .unwrap_or("?");

            let style = match edge.weight().kind {
                DependencyKind::Reference => "solid",
                DependencyKind::Explicit => "dotted",
                DependencyKind::CrossStack => "bold",
            };
            let color = match edge.weight().kind {
                DependencyKind::CrossStack => "red",
                _ => "gray",
            };

            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [style={}, color={}];\n",
                source, target, style, color
            ));
        }

        output.push_str("}\n");
        output
    }

    /// Resource ids grouped by stack
    pub fn resources_by_stack(&self) -> HashMap<String, Vec<String>> {
        let mut by_stack: HashMap<String, Vec<String>> = HashMap::new();

        for idx in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                by_stack
                    .entry(node.stack.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }

        by_stack
    }
}
