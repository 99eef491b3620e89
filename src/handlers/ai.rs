//! EXTRACT_DATA_WITH_AI step.
//!
//! The language model is an injected [`ExtractionModel`]; the step only
//! frames the request and checks that the answer is JSON.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::contract::{StepContext, StepHandler, StepOutcome};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

/// Anything that turns page content plus an instruction into text.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    async fn complete(&self, content: &str, instructions: &str) -> Result<String, ModelError>;
}

const OUTPUT_RULES: &str = "Answer with a single valid JSON array and nothing else. \
No explanations, no markdown. Answer [] when nothing matches.";

pub struct ExtractDataWithAi {
    model: Arc<dyn ExtractionModel>,
}

impl ExtractDataWithAi {
    pub fn new(model: Arc<dyn ExtractionModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StepHandler for ExtractDataWithAi {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        self.extract(ctx).await.into()
    }
}

impl ExtractDataWithAi {
    async fn extract(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
        let content = ctx.require("Content")?;
        let prompt = ctx.require("Prompt")?;

        let instructions = format!("{}\n\n{}", OUTPUT_RULES, prompt);
        ctx.info(format!("Sending {} characters to the model", content.len()));

        let answer = self
            .model
            .complete(&content, &instructions)
            .await
            .map_err(|e| format!("Model request failed: {}", e))?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err("Empty response from model".to_string());
        }
        if serde_json::from_str::<serde_json::Value>(answer).is_err() {
            ctx.error("Model answer is not JSON");
            return Err("Model response is not valid JSON".to_string());
        }

        Ok(StepOutcome::success_with([("Extracted Data", answer)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::contract::testing::Harness;

    struct Canned(Result<&'static str, &'static str>);

    #[async_trait]
    impl ExtractionModel for Canned {
        async fn complete(&self, _content: &str, instructions: &str) -> Result<String, ModelError> {
            assert!(instructions.contains("JSON"));
            self.0.map(str::to_string).map_err(|e| ModelError(e.to_string()))
        }
    }

    fn handler(answer: Result<&'static str, &'static str>) -> ExtractDataWithAi {
        ExtractDataWithAi::new(Arc::new(Canned(answer)))
    }

    fn harness() -> Harness {
        Harness::new()
            .with_input("Content", "<li>Lamp 19.99</li>")
            .with_input("Prompt", "List product names")
    }

    #[tokio::test]
    async fn test_json_answer_is_passed_through() {
        let outcome = harness().run(&handler(Ok(" [\"Lamp\"] \n"))).await.0;
        assert_eq!(
            outcome,
            StepOutcome::success_with([("Extracted Data", "[\"Lamp\"]")])
        );
    }

    #[tokio::test]
    async fn test_prose_answer_fails() {
        let outcome = harness().run(&handler(Ok("Here you go: Lamp"))).await.0;
        assert_eq!(outcome, StepOutcome::failure("Model response is not valid JSON"));
    }

    #[tokio::test]
    async fn test_empty_answer_fails() {
        let outcome = harness().run(&handler(Ok("   "))).await.0;
        assert_eq!(outcome, StepOutcome::failure("Empty response from model"));
    }

    #[tokio::test]
    async fn test_model_error_fails() {
        let outcome = harness().run(&handler(Err("quota exceeded"))).await.0;
        assert_eq!(
            outcome,
            StepOutcome::failure("Model request failed: quota exceeded")
        );
    }
}
