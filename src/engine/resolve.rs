//! Input Resolution
//!
//! Turns a step's declared inputs into the values its handler sees:
//!
//! 1. Declared inputs are taken as written
//! 2. Each incoming edge fills its target input from the source step's
//!    output, unless the input already has a value
//! 3. `{nodeId.outputName}` references are replaced with outputs of any
//!    completed step in the run
//!
//! Resolution is a pure function of the inputs, the edges and a snapshot of
//! completed outputs.

use std::collections::HashMap;

use crate::graph::Edge;

/// Outputs of completed steps, keyed by node ID.
pub type OutputSnapshot = HashMap<String, HashMap<String, String>>;

/// Resolves the inputs of one step.
///
/// # Arguments
///
/// * `declared` - Inputs as written on the node
/// * `incoming` - Edges whose target is the node
/// * `snapshot` - Outputs of every completed step
pub fn resolve_inputs<'e>(
    declared: &HashMap<String, String>,
    incoming: impl IntoIterator<Item = &'e Edge>,
    snapshot: &OutputSnapshot,
) -> HashMap<String, String> {
    let mut resolved = declared.clone();

    for edge in incoming {
        let already_set = resolved
            .get(&edge.target_handle)
            .is_some_and(|v| !v.is_empty());
        if already_set {
            continue;
        }

        let value = snapshot
            .get(&edge.source)
            .and_then(|outputs| outputs.get(&edge.source_handle))
            .filter(|v| !v.is_empty());

        if let Some(value) = value {
            resolved.insert(edge.target_handle.clone(), value.clone());
        }
    }

    resolved
        .into_iter()
        .map(|(name, value)| {
            let value = substitute_references(&value, snapshot);
            (name, value)
        })
        .collect()
}

/// Replaces every `{nodeId.outputName}` with the referenced output.
///
/// References to unknown steps or empty outputs are left as written. Braces
/// without a dot (loop placeholders such as `{item}`) are never touched.
pub fn substitute_references(value: &str, snapshot: &OutputSnapshot) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];

        let Some(close) = after_open.find('}') else {
            result.push_str(&rest[open..]);
            return result;
        };

        let reference = &after_open[..close];
        match lookup(reference, snapshot) {
            Some(replacement) => result.push_str(replacement),
            None => result.push_str(&rest[open..open + close + 2]),
        }
        rest = &after_open[close + 1..];
    }

    result.push_str(rest);
    result
}

fn lookup<'s>(reference: &str, snapshot: &'s OutputSnapshot) -> Option<&'s str> {
    let (node_id, output) = reference.split_once('.')?;
    if node_id.is_empty() || output.is_empty() {
        return None;
    }
    snapshot
        .get(node_id)?
        .get(output)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}
