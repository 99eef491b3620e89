//! Graph Validation
//!
//! Structural checks run before a graph snapshot is turned into run steps:
//! - Node field validation
//! - Reference integrity for dependencies and edges
//! - Cycle detection (Kahn's algorithm)
//! - Loop bodies that cannot be repeated per item
//! - Static execution layering for plan previews

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info};

use super::model::GraphDefinition;
use crate::node_type::{CONDITION, FOREACH};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyGraph,
    DuplicateNodeId(String),
    EmptyNodeId,
    EmptyNodeType(String),
    InvalidReference { node: String, reference: String },
    CyclicDependency,
    ConditionInLoop { node: String, foreach: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyGraph => write!(f, "Graph has no nodes"),
            Self::DuplicateNodeId(id) => write!(f, "Duplicate node ID: '{}'", id),
            Self::EmptyNodeId => write!(f, "Node has empty or whitespace-only ID"),
            Self::EmptyNodeType(node) => write!(f, "Node '{}' has no type specified", node),
            Self::InvalidReference { node, reference } => {
                write!(f, "Node '{}' references unknown node '{}'", node, reference)
            }
            Self::CyclicDependency => {
                write!(f, "Graph contains cyclic dependencies (nodes depend on each other in a loop)")
            }
            Self::ConditionInLoop { node, foreach } => write!(
                f,
                "CONDITION '{}' cannot be the per-item body of FOREACH '{}'",
                node, foreach
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates the whole graph, collecting every problem found.
///
/// Performs the following checks:
/// 1. Graph is not empty
/// 2. No duplicate or blank node IDs
/// 3. Every node has a type
/// 4. Every dependency and edge endpoint refers to an existing node
/// 5. No CONDITION directly below a FOREACH (its branches cannot be
///    gated once per item)
/// 6. No cyclic dependencies
pub fn validate_graph(graph: &GraphDefinition) -> Result<(), Vec<ValidationError>> {
    info!("Validating graph with {} nodes", graph.len());

    if graph.is_empty() {
        return Err(vec![ValidationError::EmptyGraph]);
    }

    let mut errors = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for node in &graph.nodes {
        if node.id.trim().is_empty() {
            errors.push(ValidationError::EmptyNodeId);
            continue;
        }
        if !seen_ids.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
        if node.node_type.trim().is_empty() {
            errors.push(ValidationError::EmptyNodeType(node.id.clone()));
        }
    }

    for node in &graph.nodes {
        for dep in &node.dependencies {
            if !seen_ids.contains(dep.as_str()) {
                errors.push(ValidationError::InvalidReference {
                    node: node.id.clone(),
                    reference: dep.clone(),
                });
            }
        }
    }

    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen_ids.contains(endpoint.as_str()) {
                errors.push(ValidationError::InvalidReference {
                    node: if endpoint == &edge.source {
                        edge.target.clone()
                    } else {
                        edge.source.clone()
                    },
                    reference: endpoint.clone(),
                });
            }
        }
    }

    for node in graph.nodes.iter().filter(|n| n.node_type == CONDITION) {
        for dep in graph.dependencies_of(&node.id) {
            if graph.get_node(&dep).is_some_and(|d| d.node_type == FOREACH) {
                errors.push(ValidationError::ConditionInLoop {
                    node: node.id.clone(),
                    foreach: dep,
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    if execution_layers(graph).is_none() {
        return Err(vec![ValidationError::CyclicDependency]);
    }

    debug!("Graph validated: {} nodes, {} edges", graph.len(), graph.edges.len());
    Ok(())
}

/// Groups nodes into the batches a scheduler would run if every branch
/// were taken.
///
/// Uses Kahn's algorithm level by level. Returns `None` when the graph
/// contains a cycle.
pub fn execution_layers(graph: &GraphDefinition) -> Option<Vec<Vec<String>>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut successors: HashMap<String, Vec<&str>> = HashMap::new();

    for node in &graph.nodes {
        let deps = graph.dependencies_of(&node.id);
        in_degree.insert(node.id.as_str(), deps.len());
        for dep in deps {
            successors.entry(dep).or_default().push(node.id.as_str());
        }
    }

    // Start with root nodes, keeping declaration order
    let mut current: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut visited = 0;

    while !current.is_empty() {
        let mut next: VecDeque<&str> = VecDeque::new();
        let mut layer = Vec::new();

        while let Some(id) = current.pop_front() {
            visited += 1;
            layer.push(id.to_string());

            for successor in successors.get(id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push_back(*successor);
                    }
                }
            }
        }

        layers.push(layer);
        current = next;
    }

    if visited != graph.len() {
        return None;
    }

    Some(layers)
}
