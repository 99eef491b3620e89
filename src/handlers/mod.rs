//! Built-in step handlers
//!
//! - [`browser`]: page-driving steps with automatic challenge detection
//! - [`condition`], [`foreach`], [`merge`]: control flow and data shaping
//! - [`interaction`]: the explicit human gate
//! - [`data`]: JSON property access
//! - [`webhook`]: outbound HTTP delivery
//! - [`ai`]: model-backed extraction, registered only with a model

pub mod ai;
pub mod browser;
pub mod condition;
pub mod data;
pub mod foreach;
pub mod interaction;
pub mod merge;
pub mod webhook;

use std::sync::Arc;

use crate::engine::registry::HandlerRegistry;
use crate::node_type::*;

pub use ai::{ExtractionModel, ModelError};

/// Registers every handler that needs no external collaborator.
pub fn register_builtins(registry: &HandlerRegistry) {
    registry.register(LAUNCH_BROWSER, Arc::new(browser::LaunchBrowser));
    registry.register(NAVIGATE_URL, Arc::new(browser::NavigateUrl));
    registry.register(PAGE_TO_HTML, Arc::new(browser::PageToHtml));
    registry.register(
        EXTRACT_TEXT_FROM_ELEMENT,
        Arc::new(browser::ExtractTextFromElement),
    );
    registry.register(FILL_INPUT, Arc::new(browser::FillInput));
    registry.register(CLICK_ELEMENT, Arc::new(browser::ClickElement));
    registry.register(WAIT_FOR_ELEMENT, Arc::new(browser::WaitForElement));
    registry.register(SCROLL_TO_ELEMENT, Arc::new(browser::ScrollToElement));

    registry.register(CONDITION, Arc::new(condition::Condition));
    registry.register(FOREACH, Arc::new(foreach::ForEach));
    registry.register(FOREACH_JOIN, Arc::new(foreach::ForEachJoin));
    registry.register(MERGE, Arc::new(merge::Merge));
    registry.register(WAIT_FOR_USER_INPUT, Arc::new(interaction::WaitForUserInput));

    registry.register(READ_PROPERTY_FROM_JSON, Arc::new(data::ReadPropertyFromJson));
    registry.register(ADD_PROPERTY_TO_JSON, Arc::new(data::AddPropertyToJson));
    registry.register(DELIVER_VIA_WEBHOOK, Arc::new(webhook::DeliverViaWebhook::new()));
}

/// Enables EXTRACT_DATA_WITH_AI backed by the given model.
pub fn register_extraction_model(registry: &HandlerRegistry, model: Arc<dyn ExtractionModel>) {
    registry.register(EXTRACT_DATA_WITH_AI, Arc::new(ai::ExtractDataWithAi::new(model)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ExtractionModel for Echo {
        async fn complete(&self, content: &str, _instructions: &str) -> Result<String, ModelError> {
            Ok(content.to_string())
        }
    }

    #[test]
    fn test_every_builtin_type_has_a_handler() {
        let registry = HandlerRegistry::with_builtins();
        let expected = [
            LAUNCH_BROWSER,
            NAVIGATE_URL,
            PAGE_TO_HTML,
            EXTRACT_TEXT_FROM_ELEMENT,
            FILL_INPUT,
            CLICK_ELEMENT,
            WAIT_FOR_ELEMENT,
            SCROLL_TO_ELEMENT,
            DELIVER_VIA_WEBHOOK,
            READ_PROPERTY_FROM_JSON,
            ADD_PROPERTY_TO_JSON,
            CONDITION,
            FOREACH,
            FOREACH_JOIN,
            WAIT_FOR_USER_INPUT,
            MERGE,
        ];
        assert_eq!(registry.node_types().len(), expected.len());
    }

    #[test]
    fn test_extraction_model_registration() {
        let registry = HandlerRegistry::with_builtins();
        register_extraction_model(&registry, Arc::new(Echo));
        assert!(registry.contains(EXTRACT_DATA_WITH_AI));
    }
}
