//! Graph Data Model
//!
//! Immutable graph snapshot taken when a workflow is published. A run is
//! created from one of these and never sees later edits.
//!
//! # Example YAML Format
//!
//! ```yaml
//! nodes:
//!   - id: open
//!     type: LAUNCH_BROWSER
//!     inputs:
//!       Website Url: https://example.com/product
//!
//!   - id: price
//!     type: EXTRACT_TEXT_FROM_ELEMENT
//!     inputs:
//!       Selector: .price
//!     dependencies: [open]
//!
//!   - id: cheap
//!     type: CONDITION
//!     inputs:
//!       Left Value: "{price.Extracted Text}"
//!       Operator: LESS_THAN
//!       Right Value: "50"
//!     dependencies: [price]
//!
//!   - id: alert
//!     type: DELIVER_VIA_WEBHOOK
//!     inputs:
//!       Target URL: https://hooks.example.com/alert
//!       Body: cheap!
//!
//! edges:
//!   - source: cheap
//!     source_handle: result
//!     target: alert
//!     target_handle: Trigger
//!     condition: "true"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Branch label carried by an edge leaving a CONDITION step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchLabel {
    #[serde(rename = "true")]
    True,
    #[serde(rename = "false")]
    False,
}

impl BranchLabel {
    /// Returns the label as the literal a CONDITION step writes to `result`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchLabel::True => "true",
            BranchLabel::False => "false",
        }
    }

    /// Returns true if a CONDITION `result` output selects this branch.
    pub fn matches(&self, result: Option<&str>) -> bool {
        result == Some(self.as_str())
    }
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node of the graph.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeDefinition {
    /// Graph-local identifier
    pub id: String,

    /// Step type, looked up in the handler registry at run time
    #[serde(rename = "type")]
    pub node_type: String,

    /// Declared input values (may contain `{nodeId.output}` references)
    #[serde(default)]
    pub inputs: HashMap<String, String>,

    /// IDs of nodes that must complete before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Branch labels required from CONDITION dependencies
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub edge_conditions: BTreeMap<String, BranchLabel>,
}

impl NodeDefinition {
    /// Creates a node with no inputs or dependencies.
    ///
    /// # Example
    ///
    /// ```
    /// use flowpilot::graph::NodeDefinition;
    ///
    /// let node = NodeDefinition::new("check", "CONDITION")
    ///     .with_input("Left Value", "a")
    ///     .with_input("Operator", "EQUALS")
    ///     .with_input("Right Value", "a");
    /// assert_eq!(node.inputs.len(), 3);
    /// ```
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            node_type: node_type.into().trim().to_string(),
            inputs: HashMap::new(),
            dependencies: Vec::new(),
            edge_conditions: BTreeMap::new(),
        }
    }

    /// Sets a declared input value.
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Adds a dependency on another node.
    pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
        self.dependencies.push(node_id.into());
        self
    }

    /// Adds a dependency on a CONDITION node, gated by a branch label.
    pub fn on_branch(mut self, node_id: impl Into<String>, label: BranchLabel) -> Self {
        let node_id = node_id.into();
        if !self.dependencies.contains(&node_id) {
            self.dependencies.push(node_id.clone());
        }
        self.edge_conditions.insert(node_id, label);
        self
    }
}

/// Directed arc from a source output to a target input.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Edge {
    pub source: String,
    #[serde(default)]
    pub source_handle: String,
    pub target: String,
    #[serde(default)]
    pub target_handle: String,
    /// Branch label, only meaningful when the source is a CONDITION step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<BranchLabel>,
}

impl Edge {
    /// Creates an edge that copies `source.source_handle` into `target.target_handle`.
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_handle: source_handle.into(),
            target: target.into(),
            target_handle: target_handle.into(),
            condition: None,
        }
    }

    /// Tags the edge with a branch label.
    pub fn with_condition(mut self, label: BranchLabel) -> Self {
        self.condition = Some(label);
        self
    }
}

/// A complete graph snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GraphDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,

    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphDefinition {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph from nodes and edges.
    pub fn from_parts(nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Adds a node to the graph.
    pub fn add_node(&mut self, node: NodeDefinition) -> Result<(), String> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(format!("Node '{}' already exists", node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Adds an edge to the graph.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Gets a node by ID.
    pub fn get_node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns the edges that end at a node.
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Effective dependency list of a node.
    ///
    /// Declared dependencies come first, followed by every edge source that
    /// targets the node. Duplicates are dropped.
    pub fn dependencies_of(&self, node_id: &str) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();

        if let Some(node) = self.get_node(node_id) {
            for dep in &node.dependencies {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
        }

        for edge in self.incoming_edges(node_id) {
            if !deps.contains(&edge.source) {
                deps.push(edge.source.clone());
            }
        }

        deps
    }

    /// Effective branch labels of a node, keyed by dependency ID.
    ///
    /// Edge labels override node-level declarations for the same source.
    pub fn edge_conditions_of(&self, node_id: &str) -> BTreeMap<String, BranchLabel> {
        let mut conditions = self
            .get_node(node_id)
            .map(|n| n.edge_conditions.clone())
            .unwrap_or_default();

        for edge in self.incoming_edges(node_id) {
            if let Some(label) = edge.condition {
                conditions.insert(edge.source.clone(), label);
            }
        }

        conditions
    }

    /// Returns nodes with no effective dependencies (entry points).
    pub fn root_nodes(&self) -> Vec<&NodeDefinition> {
        self.nodes
            .iter()
            .filter(|n| self.dependencies_of(&n.id).is_empty())
            .collect()
    }

    /// Returns the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
