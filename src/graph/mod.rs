//! Graph Definition Module
//!
//! Data structures and utilities for the graph snapshot a run executes.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (NodeDefinition, Edge, GraphDefinition)
//! - [`parser`]: YAML/JSON loading
//! - [`validator`]: Validation rules, cycle detection and layering

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{BranchLabel, Edge, GraphDefinition, NodeDefinition};
pub use parser::{load_graph, parse_graph, save_graph, GraphError};
pub use validator::{execution_layers, validate_graph, ValidationError};
