//! JSON property steps.
//!
//! - READ_PROPERTY_FROM_JSON: `JSON`, `Property name` -> `Property value`
//! - ADD_PROPERTY_TO_JSON: `JSON`, `Property name`, `Property value` -> `Updated JSON`
//!
//! String properties are returned raw; anything else is returned as JSON.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::engine::contract::{StepContext, StepHandler, StepOutcome};

fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err("JSON input must be an object".to_string()),
        Err(e) => Err(format!("JSON input is not valid JSON: {}", e)),
    }
}

pub struct ReadPropertyFromJson;

#[async_trait]
impl StepHandler for ReadPropertyFromJson {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        read_property(ctx).into()
    }
}

fn read_property(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let raw = ctx.require("JSON")?;
    let name = ctx.require("Property name")?;
    let object = parse_object(&raw)?;

    let value = object
        .get(&name)
        .ok_or_else(|| format!("Property '{}' not found", name))?;
    let value = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    ctx.info(format!("Read property '{}'", name));
    Ok(StepOutcome::success_with([("Property value", value)]))
}

pub struct AddPropertyToJson;

#[async_trait]
impl StepHandler for AddPropertyToJson {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        add_property(ctx).into()
    }
}

fn add_property(ctx: &mut StepContext<'_>) -> Result<StepOutcome, String> {
    let raw = ctx.require("JSON")?;
    let name = ctx.require("Property name")?;
    let value = ctx.require("Property value")?;

    let mut object = parse_object(&raw)?;
    object.insert(name.clone(), Value::String(value));

    ctx.info(format!("Set property '{}'", name));
    Ok(StepOutcome::success_with([(
        "Updated JSON",
        Value::Object(object).to_string(),
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::contract::testing::Harness;

    #[tokio::test]
    async fn test_read_string_property_raw() {
        let harness = Harness::new()
            .with_input("JSON", r#"{"title": "Lamp", "price": 19.5}"#)
            .with_input("Property name", "title");
        assert_eq!(
            harness.run(&ReadPropertyFromJson).await.0,
            StepOutcome::success_with([("Property value", "Lamp")])
        );
    }

    #[tokio::test]
    async fn test_read_non_string_property_as_json() {
        let harness = Harness::new()
            .with_input("JSON", r#"{"tags": ["a", "b"]}"#)
            .with_input("Property name", "tags");
        assert_eq!(
            harness.run(&ReadPropertyFromJson).await.0,
            StepOutcome::success_with([("Property value", r#"["a","b"]"#)])
        );
    }

    #[tokio::test]
    async fn test_read_missing_property_fails() {
        let harness = Harness::new()
            .with_input("JSON", "{}")
            .with_input("Property name", "title");
        assert_eq!(
            harness.run(&ReadPropertyFromJson).await.0,
            StepOutcome::failure("Property 'title' not found")
        );
    }

    #[tokio::test]
    async fn test_add_property() {
        let harness = Harness::new()
            .with_input("JSON", r#"{"a": 1}"#)
            .with_input("Property name", "b")
            .with_input("Property value", "two");
        let StepOutcome::Success(outputs) = harness.run(&AddPropertyToJson).await.0 else {
            panic!("expected success");
        };
        let updated: Value = serde_json::from_str(&outputs["Updated JSON"]).unwrap();
        assert_eq!(updated, serde_json::json!({"a": 1, "b": "two"}));
    }

    #[tokio::test]
    async fn test_add_requires_value() {
        let harness = Harness::new()
            .with_input("JSON", "{}")
            .with_input("Property name", "b");
        assert_eq!(
            harness.run(&AddPropertyToJson).await.0,
            StepOutcome::failure("Property value input is missing")
        );
    }

    #[tokio::test]
    async fn test_array_input_rejected() {
        let harness = Harness::new()
            .with_input("JSON", "[1]")
            .with_input("Property name", "b")
            .with_input("Property value", "c");
        assert_eq!(
            harness.run(&AddPropertyToJson).await.0,
            StepOutcome::failure("JSON input must be an object")
        );
    }
}
