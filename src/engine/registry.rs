//! Handler Registry
//!
//! Runtime-mutable mapping from node type to handler. New step types can be
//! registered while the engine is running; the scheduler looks handlers up
//! by the step's type string every time a step starts.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use super::contract::StepHandler;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn StepHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in step type.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::handlers::register_builtins(&registry);
        registry
    }

    /// Registers a handler, replacing any previous one for the type.
    pub fn register(&self, node_type: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let node_type = node_type.into();
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.insert(node_type.clone(), handler).is_some() {
            warn!("Replaced handler for node type '{}'", node_type);
        } else {
            debug!("Registered handler for node type '{}'", node_type);
        }
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node_type)
            .cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(node_type)
    }

    /// Registered node types, sorted.
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::contract::{StepContext, StepOutcome};
    use crate::node_type::*;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl StepHandler for Noop {
        async fn execute(&self, _ctx: &mut StepContext<'_>) -> StepOutcome {
            StepOutcome::success()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("NOOP").is_none());

        registry.register("NOOP", Arc::new(Noop));
        assert!(registry.contains("NOOP"));
        assert!(registry.get("NOOP").is_some());
    }

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::with_builtins();
        for node_type in [
            LAUNCH_BROWSER,
            NAVIGATE_URL,
            PAGE_TO_HTML,
            CONDITION,
            FOREACH,
            FOREACH_JOIN,
            WAIT_FOR_USER_INPUT,
            MERGE,
            DELIVER_VIA_WEBHOOK,
        ] {
            assert!(registry.contains(node_type), "missing {}", node_type);
        }
        // Needs an injected model
        assert!(!registry.contains(EXTRACT_DATA_WITH_AI));
    }

    #[test]
    fn test_node_types_sorted() {
        let registry = HandlerRegistry::new();
        registry.register("B", Arc::new(Noop));
        registry.register("A", Arc::new(Noop));
        assert_eq!(registry.node_types(), vec!["A", "B"]);
    }
}
