//! FOREACH and FOREACH_JOIN steps.
//!
//! FOREACH only validates and records the item list. The scheduler expands
//! the loop body after the batch; the body's own step turns into a
//! FOREACH_JOIN that gathers the per-item outputs.

use async_trait::async_trait;
use log::warn;
use serde_json::{Map, Value};

use crate::engine::contract::{StepContext, StepHandler, StepOutcome};

pub struct ForEach;

#[async_trait]
impl StepHandler for ForEach {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let raw_items = ctx.input("Items").unwrap_or_default().to_string();
        let variable = ctx
            .input("Item Variable")
            .unwrap_or_default()
            .trim()
            .to_string();

        ctx.info(format!("Starting FOREACH loop with variable: {}", variable));

        let items = match serde_json::from_str::<Value>(&raw_items) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                ctx.error("Items must be a JSON array");
                return StepOutcome::failure("Items must be a JSON array");
            }
            Err(_) => {
                ctx.error(format!("Failed to parse items as JSON: {}", raw_items));
                return StepOutcome::failure(format!(
                    "Items must be a valid JSON array. Got: {}",
                    raw_items
                ));
            }
        };

        if variable.is_empty() {
            ctx.error("Item Variable is required");
            return StepOutcome::failure("Item Variable name is required");
        }

        ctx.info(format!("FOREACH will iterate over {} items", items.len()));

        StepOutcome::success_with([
            ("_items", Value::Array(items.clone()).to_string()),
            ("_itemVariable", variable),
            ("results", "[]".to_string()),
            ("count", items.len().to_string()),
        ])
    }
}

/// Gathers the outputs of every loop iteration, in item order.
pub struct ForEachJoin;

#[async_trait]
impl StepHandler for ForEachJoin {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let mut results = Vec::with_capacity(ctx.dependencies().len());

        for iteration in ctx.dependencies() {
            match ctx.completed_outputs(iteration) {
                Some(outputs) => {
                    let object: Map<String, Value> = outputs
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect();
                    results.push(Value::Object(object));
                }
                None => warn!("Iteration '{}' has no outputs to collect", iteration),
            }
        }

        let count = results.len();
        ctx.info(format!("Collected {} iteration results", count));

        StepOutcome::success_with([
            ("results", Value::Array(results).to_string()),
            ("count", count.to_string()),
        ])
    }
}
