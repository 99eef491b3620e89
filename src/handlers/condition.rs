//! CONDITION step.
//!
//! Compares `Left Value` against `Right Value` and publishes `result` as
//! `"true"` or `"false"`. The scheduler gates labelled downstream steps on
//! that output.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::engine::contract::{StepContext, StepHandler, StepOutcome};

/// Comparison operators understood by CONDITION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "EQUALS",
            Operator::NotEquals => "NOT_EQUALS",
            Operator::Contains => "CONTAINS",
            Operator::NotContains => "NOT_CONTAINS",
            Operator::StartsWith => "STARTS_WITH",
            Operator::EndsWith => "ENDS_WITH",
            Operator::IsEmpty => "IS_EMPTY",
            Operator::IsNotEmpty => "IS_NOT_EMPTY",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::LessThan => "LESS_THAN",
            Operator::GreaterOrEqual => "GREATER_OR_EQUAL",
            Operator::LessOrEqual => "LESS_OR_EQUAL",
        }
    }

    /// Evaluates the operator.
    ///
    /// Numeric operators parse both sides as `f64`; when either side is not
    /// a number the comparison is false.
    pub fn evaluate(&self, left: &str, right: &str) -> bool {
        match self {
            Operator::Equals => left == right,
            Operator::NotEquals => left != right,
            Operator::Contains => left.contains(right),
            Operator::NotContains => !left.contains(right),
            Operator::StartsWith => left.starts_with(right),
            Operator::EndsWith => left.ends_with(right),
            Operator::IsEmpty => left.trim().is_empty(),
            Operator::IsNotEmpty => !left.trim().is_empty(),
            Operator::GreaterThan => compare(left, right, |l, r| l > r),
            Operator::LessThan => compare(left, right, |l, r| l < r),
            Operator::GreaterOrEqual => compare(left, right, |l, r| l >= r),
            Operator::LessOrEqual => compare(left, right, |l, r| l <= r),
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let operator = match s.trim() {
            "EQUALS" => Operator::Equals,
            "NOT_EQUALS" => Operator::NotEquals,
            "CONTAINS" => Operator::Contains,
            "NOT_CONTAINS" => Operator::NotContains,
            "STARTS_WITH" => Operator::StartsWith,
            "ENDS_WITH" => Operator::EndsWith,
            "IS_EMPTY" => Operator::IsEmpty,
            "IS_NOT_EMPTY" => Operator::IsNotEmpty,
            "GREATER_THAN" => Operator::GreaterThan,
            "LESS_THAN" => Operator::LessThan,
            "GREATER_OR_EQUAL" => Operator::GreaterOrEqual,
            "LESS_OR_EQUAL" => Operator::LessOrEqual,
            other => return Err(format!("Unknown operator: {}", other)),
        };
        Ok(operator)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compare(left: &str, right: &str, op: impl Fn(f64, f64) -> bool) -> bool {
    match (leading_number(left), leading_number(right)) {
        (Some(l), Some(r)) => op(l, r),
        _ => false,
    }
}

/// Reads the number a value starts with, so "19.99 EUR" compares as 19.99.
///
/// `None` when the value does not start with a number.
fn leading_number(value: &str) -> Option<f64> {
    let s = value.trim_start();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    if s[end..].starts_with("Infinity") {
        return s[..end + "Infinity".len()].parse().ok();
    }

    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}

pub struct Condition;

#[async_trait]
impl StepHandler for Condition {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let left = ctx.input("Left Value").unwrap_or_default().to_string();
        let right = ctx.input("Right Value").unwrap_or_default().to_string();
        let raw_operator = ctx.input("Operator").unwrap_or_default().to_string();

        let operator = match raw_operator.parse::<Operator>() {
            Ok(operator) => operator,
            Err(message) => {
                ctx.error(message.clone());
                return StepOutcome::failure(message);
            }
        };

        ctx.info(format!(
            "Evaluating condition: \"{}\" {} \"{}\"",
            left, operator, right
        ));
        let result = operator.evaluate(&left, &right);
        ctx.info(format!("Condition result: {}", result));

        StepOutcome::success_with([("result", result.to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::contract::testing::Harness;

    async fn run(left: &str, operator: &str, right: &str) -> StepOutcome {
        let harness = Harness::new()
            .with_input("Left Value", left)
            .with_input("Operator", operator)
            .with_input("Right Value", right);
        harness.run(&Condition).await.0
    }

    fn result(outcome: &StepOutcome) -> &str {
        match outcome {
            StepOutcome::Success(outputs) => outputs["result"].as_str(),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_string_operators() {
        assert!(Operator::Equals.evaluate("a", "a"));
        assert!(Operator::NotEquals.evaluate("a", "b"));
        assert!(Operator::Contains.evaluate("price: 42", "42"));
        assert!(Operator::NotContains.evaluate("sold out", "in stock"));
        assert!(Operator::StartsWith.evaluate("https://x", "https"));
        assert!(Operator::EndsWith.evaluate("report.pdf", ".pdf"));
    }

    #[test]
    fn test_emptiness_is_trim_based() {
        assert!(Operator::IsEmpty.evaluate("   ", ""));
        assert!(!Operator::IsNotEmpty.evaluate("\n\t", ""));
        assert!(Operator::IsNotEmpty.evaluate(" x ", ""));
    }

    #[test]
    fn test_numeric_operators() {
        assert!(Operator::GreaterThan.evaluate("10", "9.5"));
        assert!(Operator::LessThan.evaluate("-1", "0"));
        assert!(Operator::GreaterOrEqual.evaluate("3", "3.0"));
        assert!(Operator::LessOrEqual.evaluate(" 2 ", "2"));
    }

    #[test]
    fn test_non_numeric_comparison_is_false() {
        assert!(!Operator::GreaterThan.evaluate("abc", "1"));
        assert!(!Operator::LessThan.evaluate("1", ""));
        assert!(!Operator::GreaterOrEqual.evaluate("$5", "5"));
    }

    #[test]
    fn test_numeric_operators_read_leading_number() {
        assert!(Operator::GreaterThan.evaluate("19.99 EUR", "10"));
        assert!(Operator::LessThan.evaluate("42px", "100"));
        assert!(Operator::GreaterOrEqual.evaluate("1e3 items", "999"));
        assert!(Operator::LessOrEqual.evaluate(".5", "0.5"));
        assert!(!Operator::GreaterThan.evaluate("abc", "10"));
        assert!(!Operator::GreaterThan.evaluate("EUR 19.99", "10"));
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("  -3.5kg"), Some(-3.5));
        assert_eq!(leading_number("7e"), Some(7.0));
        assert_eq!(leading_number("12."), Some(12.0));
        assert_eq!(leading_number("-Infinity"), Some(f64::NEG_INFINITY));
        assert_eq!(leading_number("."), None);
        assert_eq!(leading_number("-"), None);
        assert_eq!(leading_number(""), None);
    }

    #[test]
    fn test_operator_names_round_trip() {
        for name in ["EQUALS", "IS_NOT_EMPTY", "LESS_OR_EQUAL"] {
            assert_eq!(name.parse::<Operator>().unwrap().as_str(), name);
        }
    }

    #[tokio::test]
    async fn test_condition_outputs_literal_booleans() {
        assert_eq!(result(&run("5", "GREATER_THAN", "3").await), "true");
        assert_eq!(result(&run("5", "EQUALS", "3").await), "false");
    }

    #[tokio::test]
    async fn test_missing_values_default_to_empty() {
        let harness = Harness::new().with_input("Operator", "IS_EMPTY");
        let (outcome, _) = harness.run(&Condition).await;
        assert_eq!(result(&outcome), "true");
    }

    #[tokio::test]
    async fn test_unknown_operator_fails() {
        let outcome = run("a", "ROUGHLY", "b").await;
        assert_eq!(outcome, StepOutcome::failure("Unknown operator: ROUGHLY"));
    }
}
