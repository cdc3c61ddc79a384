//! Read-only access to the host's workflow graph.
//!
//! The host hands over the executed graph as JSON: an object keyed by node id,
//! each node carrying an `inputs` object.
//!
//! ```json
//! {
//!   "3": { "class_type": "KSampler", "inputs": { "seed": 42, "steps": 20, "cfg": 7.5 } },
//!   "4": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "sd_xl_base.safetensors" } }
//! }
//! ```
//!
//! Lookups never fail loudly: a missing key is simply `None`, because template
//! keys routinely name parameters that a given workflow does not have.
//!
//! The graph is parsed with `serde_json`'s `preserve_order` feature, so the
//! depth-first search visits nodes in the order the host wrote them.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Parameter names pulled out by [`common_parameters`].
const COMMON_PARAMS: &[&str] = &[
    "sampler_name",
    "scheduler",
    "steps",
    "cfg",
    "seed",
    "width",
    "height",
    "denoise",
    "model",
    "ckpt_name",
    "vae_name",
    "clip_skip",
    "lora_name",
];

/// Substrings that mark an input as a model reference.
const MODEL_HINTS: &[&str] = &["ckpt", "model", "vae", "lora", "embedding", "controlnet"];

/// Input names that describe the sampler run.
const SAMPLER_KEYS: &[&str] = &[
    "sampler_name",
    "scheduler",
    "steps",
    "cfg",
    "seed",
    "denoise",
    "noise_seed",
    "control_after_generate",
];

/// Find the first value stored under `key`, searching depth-first.
///
/// Within an object a direct match wins over anything nested deeper; otherwise
/// the object's values (and array items) are searched in order.
pub fn find_key<'a>(graph: &'a Value, key: &str) -> Option<&'a Value> {
    match graph {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            map.values().find_map(|v| find_key(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

/// Look up `graph[node_id].inputs[input]`.
pub fn node_input<'a>(graph: &'a Value, node_id: &str, input: &str) -> Option<&'a Value> {
    graph.get(node_id)?.get("inputs")?.get(input)
}

/// Render a parameter value the way it should appear in a name.
///
/// Strings are used verbatim, numbers and booleans via their JSON display,
/// containers as compact JSON. `null` has no textual form and yields `None`.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// SHA-256 of the compact JSON form, as a hex string.
///
/// Used as a cache key for lookups against the same graph.
pub fn fingerprint(graph: &Value) -> String {
    let digest = Sha256::digest(graph.to_string().as_bytes());
    format!("{:x}", digest)
}

/// A workflow graph paired with its fingerprint.
///
/// Computing the fingerprint serializes the whole graph, so it is done once
/// per batch rather than once per lookup.
#[derive(Debug, Clone)]
pub struct WorkflowRef<'a> {
    pub graph: &'a Value,
    pub fingerprint: String,
}

impl<'a> WorkflowRef<'a> {
    pub fn new(graph: &'a Value) -> Self {
        Self {
            graph,
            fingerprint: fingerprint(graph),
        }
    }
}

/// Depth-first walk calling `visit(path, key, value)` for every object entry.
///
/// Paths are dotted for object keys and bracketed for array indices:
/// `3.inputs.seed`, `[0].name`.
fn walk<'a>(value: &'a Value, path: &str, visit: &mut impl FnMut(&str, &str, &'a Value)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                visit(&child_path, key, child);
                if child.is_object() || child.is_array() {
                    walk(child, &child_path, visit);
                }
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let child_path = if path.is_empty() {
                    format!("[{i}]")
                } else {
                    format!("{path}[{i}]")
                };
                walk(child, &child_path, visit);
            }
        }
        _ => {}
    }
}

fn matches_any(key: &str, names: &[&str]) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(key))
}

/// Commonly inspected generation parameters, keyed by input name.
///
/// Later occurrences overwrite earlier ones.
pub fn common_parameters(graph: &Value) -> Map<String, Value> {
    let mut found = Map::new();
    walk(graph, "", &mut |_, key, value| {
        if matches_any(key, COMMON_PARAMS) {
            let text = value_to_string(value).unwrap_or_else(|| "null".to_string());
            found.insert(key.to_string(), Value::String(text));
        }
    });
    found
}

/// Non-empty string inputs whose name looks like a model reference, keyed by path.
pub fn model_references(graph: &Value) -> Map<String, Value> {
    let mut found = Map::new();
    walk(graph, "", &mut |path, key, value| {
        let lower = key.to_ascii_lowercase();
        if !MODEL_HINTS.iter().any(|hint| lower.contains(hint)) {
            return;
        }
        if let Value::String(s) = value
            && !s.is_empty()
        {
            found.insert(path.to_string(), value.clone());
        }
    });
    found
}

/// Sampler settings keyed by input name, with their original JSON values.
pub fn sampler_settings(graph: &Value) -> Map<String, Value> {
    let mut found = Map::new();
    walk(graph, "", &mut |_, key, value| {
        if matches_any(key, SAMPLER_KEYS) {
            found.insert(key.to_string(), value.clone());
        }
    });
    found
}
