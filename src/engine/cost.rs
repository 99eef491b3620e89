//! Static per-type cost table.
//!
//! Kept apart from the handler registry: a type can have a cost without a
//! handler (it then fails at run time) and vice versa.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::graph::GraphDefinition;
use crate::node_type::*;

/// Built-in costs in resource units.
pub static DEFAULT_COSTS: Lazy<HashMap<&'static str, u64>> = Lazy::new(|| {
    HashMap::from([
        (LAUNCH_BROWSER, 5),
        (NAVIGATE_URL, 2),
        (PAGE_TO_HTML, 2),
        (EXTRACT_TEXT_FROM_ELEMENT, 2),
        (FILL_INPUT, 1),
        (CLICK_ELEMENT, 1),
        (WAIT_FOR_ELEMENT, 1),
        (SCROLL_TO_ELEMENT, 1),
        (DELIVER_VIA_WEBHOOK, 1),
        (EXTRACT_DATA_WITH_AI, 3),
        (READ_PROPERTY_FROM_JSON, 1),
        (ADD_PROPERTY_TO_JSON, 1),
        (CONDITION, 0),
        (FOREACH, 0),
        (FOREACH_JOIN, 0),
        (WAIT_FOR_USER_INPUT, 0),
        (MERGE, 0),
    ])
});

#[derive(Debug, Clone)]
pub struct CostTable {
    costs: HashMap<String, u64>,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            costs: DEFAULT_COSTS
                .iter()
                .map(|(node_type, cost)| (node_type.to_string(), *cost))
                .collect(),
        }
    }
}

impl CostTable {
    /// A table with no entries.
    pub fn empty() -> Self {
        Self {
            costs: HashMap::new(),
        }
    }

    pub fn with_cost(mut self, node_type: impl Into<String>, units: u64) -> Self {
        self.set(node_type, units);
        self
    }

    pub fn set(&mut self, node_type: impl Into<String>, units: u64) {
        self.costs.insert(node_type.into(), units);
    }

    pub fn cost_of(&self, node_type: &str) -> Option<u64> {
        self.costs.get(node_type).copied()
    }

    /// Cost of a type, zero when the type is unknown.
    pub fn cost_or_zero(&self, node_type: &str) -> u64 {
        self.cost_of(node_type).unwrap_or(0)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.costs.contains_key(node_type)
    }

    /// Upper bound on what a run of the graph can charge.
    pub fn estimate(&self, graph: &GraphDefinition) -> u64 {
        graph
            .nodes
            .iter()
            .map(|node| self.cost_or_zero(&node.node_type))
            .sum()
    }
}
