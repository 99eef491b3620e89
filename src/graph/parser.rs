//! Graph Parser
//!
//! Loads graph snapshots from YAML or JSON files. JSON is what the graph
//! editor publishes; YAML is convenient for hand-written graphs and tests.

use std::fs;
use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use super::model::GraphDefinition;
use super::validator::{validate_graph, ValidationError};

/// Errors raised while loading a graph file.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Failed to read graph file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse graph: {0}")]
    Parse(String),

    #[error("Invalid graph: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parses a graph from text. JSON is tried when the text starts with `{`,
/// YAML otherwise.
pub fn parse_graph(content: &str) -> Result<GraphDefinition, GraphError> {
    let trimmed = content.trim_start();

    let graph: GraphDefinition = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| GraphError::Parse(e.to_string()))?
    } else {
        serde_yaml::from_str(content).map_err(|e| GraphError::Parse(e.to_string()))?
    };

    debug!(
        "Parsed graph: {} nodes, {} edges",
        graph.nodes.len(),
        graph.edges.len()
    );
    Ok(graph)
}

/// Loads and validates a graph from a file.
///
/// # Example
///
/// ```rust,no_run
/// use flowpilot::graph::load_graph;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let graph = load_graph("price-alert.yaml")?;
///     println!("Loaded {} nodes", graph.len());
///     Ok(())
/// }
/// ```
pub fn load_graph(path: impl AsRef<Path>) -> Result<GraphDefinition, GraphError> {
    let path = path.as_ref();
    info!("Loading graph from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| GraphError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let graph = parse_graph(&content)?;
    validate_graph(&graph).map_err(GraphError::Invalid)?;

    info!("Graph loaded: {} nodes, {} edges", graph.len(), graph.edges.len());
    Ok(graph)
}

/// Saves a graph as pretty-printed JSON.
pub fn save_graph(graph: &GraphDefinition, path: impl AsRef<Path>) -> Result<(), GraphError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(graph).map_err(|e| GraphError::Parse(e.to_string()))?;
    fs::write(path, json).map_err(|source| GraphError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!("Graph saved to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::NodeDefinition;
    use tempfile::tempdir;

    #[test]
    fn test_parse_json_graph() {
        let json = r#"{
            "nodes": [
                {"id": "1", "type": "NAVIGATE_URL", "inputs": {"Url": "https://example.com"}},
                {"id": "2", "type": "PAGE_TO_HTML", "dependencies": ["1"]}
            ],
            "edges": []
        }"#;
        let graph = parse_graph(json).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.nodes[1].dependencies, vec!["1"]);
    }

    #[test]
    fn test_parse_yaml_graph() {
        let yaml = "nodes:\n  - id: a\n    type: MERGE\n";
        let graph = parse_graph(yaml).unwrap();
        assert_eq!(graph.nodes[0].id, "a");
    }

    #[test]
    fn test_parse_invalid_content() {
        assert!(matches!(
            parse_graph("nodes: [[["),
            Err(GraphError::Parse(_))
        ));
    }

    #[test]
    fn test_load_graph_file_not_found() {
        let result = load_graph("/nonexistent/path/graph.yaml");
        assert!(matches!(result, Err(GraphError::Io { .. })));
    }

    #[test]
    fn test_load_graph_rejects_cycle() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("cycle.yaml");
        std::fs::write(
            &path,
            "nodes:\n  - id: a\n    type: MERGE\n    dependencies: [b]\n  - id: b\n    type: MERGE\n    dependencies: [a]\n",
        )
        .unwrap();

        let err = load_graph(&path).unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_save_and_load_graph() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("graph.json");

        let graph = GraphDefinition::from_parts(
            vec![
                NodeDefinition::new("a", "MERGE").with_input("Input 1", "x"),
                NodeDefinition::new("b", "MERGE").depends_on("a"),
            ],
            vec![],
        );
        save_graph(&graph, &path).unwrap();

        let loaded = load_graph(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get_node("a").unwrap().inputs["Input 1"], "x");
    }
}
