//! MERGE step: combines up to ten inputs into one JSON value.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::engine::contract::{StepContext, StepHandler, StepOutcome};

const MAX_INPUTS: usize = 10;

pub struct Merge;

#[async_trait]
impl StepHandler for Merge {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let as_array = ctx.input("Merge Strategy") == Some("array");

        let inputs: Vec<(String, String)> = (1..=MAX_INPUTS)
            .map(|i| format!("Input {}", i))
            .filter_map(|name| {
                let value = ctx.input(&name)?.to_string();
                Some((name, value))
            })
            .collect();

        if inputs.is_empty() {
            ctx.error("No inputs to merge");
            return StepOutcome::failure("MERGE requires at least one input connection");
        }

        let count = inputs.len();
        let merged = if as_array {
            Value::Array(inputs.into_iter().map(|(_, v)| Value::String(v)).collect())
        } else {
            Value::Object(
                inputs
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect::<Map<String, Value>>(),
            )
        };

        let rendered = match serde_json::to_string_pretty(&merged) {
            Ok(rendered) => rendered,
            Err(e) => return StepOutcome::failure(e.to_string()),
        };
        ctx.info(format!(
            "Merged {} inputs into {}",
            count,
            if as_array { "array" } else { "object" }
        ));

        StepOutcome::success_with([("Merged Output", rendered)])
    }
}
