//! Generation metadata embedded in saved images.
//!
//! One [`GenerationMetadata`] is prepared per batch and shared by every image
//! of it. It is an ordered dictionary:
//!
//! | Key | Present when | Value |
//! |---|---|---|
//! | `prompt` | the workflow graph is non-empty | the graph |
//! | *extra keys* | the host passes extra info | usually `workflow`, the editor graph |
//! | `positive_prompt` | text is non-empty | string |
//! | `negative_prompt` | text is non-empty | string |
//! | `generated_at` | always | local ISO-8601 timestamp |
//! | `generator` | always | `{ "name", "version" }` |
//!
//! ## Format views
//!
//! The dictionary is rendered differently per container:
//!
//! - **PNG** ([`png_text_entries`](GenerationMetadata::png_text_entries)):
//!   one text chunk per key. Objects and arrays are written as JSON, strings
//!   as their raw text.
//! - **EXIF** ([`exif_fields`](GenerationMetadata::exif_fields)): three IFD0
//!   tags. `Make` holds `Prompt: {json}`, `ImageDescription` holds
//!   `Workflow: {json}` and `Software` holds `{name} v{version}`. This is the
//!   layout image viewers of the host ecosystem already read.

use crate::imaging::exif::ExifFields;
use crate::workflow;
use chrono::NaiveDateTime;
use serde_json::{Map, Value, json};

/// Name recorded in the `generator` entry.
pub const GENERATOR_NAME: &str = "Save Image Extended";

/// Timestamp layout of `generated_at`.
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Ordered metadata dictionary for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationMetadata {
    entries: Map<String, Value>,
}

impl GenerationMetadata {
    /// Build the dictionary for a batch.
    ///
    /// Extra entries may overwrite `prompt`; prompt texts and the generator
    /// entries always come last.
    pub fn prepare(
        prompt: Option<&Value>,
        extra: Option<&Map<String, Value>>,
        positive: &str,
        negative: &str,
        generated_at: &NaiveDateTime,
    ) -> Self {
        let mut entries = Map::new();
        if let Some(prompt) = prompt
            && !is_empty_value(prompt)
        {
            entries.insert("prompt".into(), prompt.clone());
        }
        if let Some(extra) = extra {
            for (key, value) in extra {
                entries.insert(key.clone(), value.clone());
            }
        }
        if !positive.is_empty() {
            entries.insert("positive_prompt".into(), Value::String(positive.into()));
        }
        if !negative.is_empty() {
            entries.insert("negative_prompt".into(), Value::String(negative.into()));
        }
        entries.insert(
            "generated_at".into(),
            Value::String(generated_at.format(ISO_FORMAT).to_string()),
        );
        entries.insert(
            "generator".into(),
            json!({ "name": GENERATOR_NAME, "version": env!("CARGO_PKG_VERSION") }),
        );
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Key/text pairs for PNG text chunks, in dictionary order.
    pub fn png_text_entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect()
    }

    /// IFD0 tags for JPEG, WebP and AVIF.
    pub fn exif_fields(&self) -> ExifFields {
        let software = self.entries.get("generator").map(|g| {
            let name = g.get("name").and_then(Value::as_str).unwrap_or("Unknown");
            let version = g.get("version").and_then(Value::as_str).unwrap_or("1.0");
            format!("{name} v{version}")
        });
        ExifFields {
            make: self
                .entries
                .get("prompt")
                .map(|p| format!("Prompt: {}", ascii_json(p))),
            image_description: self
                .entries
                .get("workflow")
                .map(|w| format!("Workflow: {}", ascii_json(w))),
            software,
        }
    }
}

/// Compact JSON with every non-ASCII character escaped as `\uXXXX`.
///
/// EXIF ASCII tags hold 7-bit text only; the escaped form parses back to the
/// same value. Characters outside the BMP become surrogate pairs.
pub fn ascii_json(value: &Value) -> String {
    let json = value.to_string();
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut [0u16; 2]) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Common generation parameters found in the metadata, plus prompt texts.
///
/// Parameter values are stringified; later occurrences in the graph win.
pub fn extract_parameters(metadata: &GenerationMetadata) -> Map<String, Value> {
    let mut params = metadata
        .get("prompt")
        .map(workflow::common_parameters)
        .unwrap_or_default();
    for key in ["positive_prompt", "negative_prompt"] {
        if let Some(text) = metadata.get(key) {
            params.insert(key.to_string(), text.clone());
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::exif::{TAG_IMAGE_DESCRIPTION, TAG_MAKE, read_ascii_tags, tiff_block};
    use crate::test_helpers::{fixed_timestamp, sample_workflow};

    fn sample() -> GenerationMetadata {
        let graph = sample_workflow();
        let mut extra = Map::new();
        extra.insert("workflow".into(), json!({ "nodes": [] }));
        GenerationMetadata::prepare(
            Some(&graph),
            Some(&extra),
            "a cat",
            "blurry",
            &fixed_timestamp(),
        )
    }

    #[test]
    fn entries_in_order() {
        let binding = sample();
        let keys: Vec<&str> = binding.entries().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "prompt",
                "workflow",
                "positive_prompt",
                "negative_prompt",
                "generated_at",
                "generator"
            ]
        );
    }

    #[test]
    fn empty_inputs_are_skipped() {
        let meta = GenerationMetadata::prepare(Some(&json!({})), None, "", "", &fixed_timestamp());
        let keys: Vec<&str> = meta.entries().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["generated_at", "generator"]);
    }

    #[test]
    fn generated_at_is_iso() {
        let meta = sample();
        assert_eq!(
            meta.get("generated_at"),
            Some(&json!("2024-01-01T12:00:00.000000"))
        );
    }

    #[test]
    fn generator_carries_crate_version() {
        let meta = sample();
        assert_eq!(meta.get("generator").unwrap()["name"], json!(GENERATOR_NAME));
        assert_eq!(
            meta.get("generator").unwrap()["version"],
            json!(env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn png_entries_json_for_objects_text_for_strings() {
        let entries = sample().png_text_entries();
        let prompt = &entries[0];
        assert_eq!(prompt.0, "prompt");
        let parsed: Value = serde_json::from_str(&prompt.1).unwrap();
        assert_eq!(parsed, sample_workflow());

        let positive = entries.iter().find(|(k, _)| k == "positive_prompt").unwrap();
        assert_eq!(positive.1, "a cat");
    }

    #[test]
    fn exif_fields_layout() {
        let fields = sample().exif_fields();
        assert!(fields.make.as_deref().unwrap().starts_with("Prompt: {"));
        assert_eq!(
            fields.image_description.as_deref(),
            Some(r#"Workflow: {"nodes":[]}"#)
        );
        assert_eq!(
            fields.software,
            Some(format!("{GENERATOR_NAME} v{}", env!("CARGO_PKG_VERSION")))
        );
    }

    #[test]
    fn exif_fields_without_workflow() {
        let meta = GenerationMetadata::prepare(None, None, "", "", &fixed_timestamp());
        let fields = meta.exif_fields();
        assert_eq!(fields.make, None);
        assert_eq!(fields.image_description, None);
        assert!(fields.software.is_some());
    }

    #[test]
    fn ascii_json_escapes_beyond_ascii() {
        let value = json!({ "text": "café 猫 😀" });
        assert_eq!(
            ascii_json(&value),
            r#"{"text":"caf\u00e9 \u732b \ud83d\ude00"}"#
        );
        assert_eq!(ascii_json(&json!({ "a": [1, "b"] })), r#"{"a":[1,"b"]}"#);
    }

    #[test]
    fn non_ascii_prompt_survives_exif() {
        let graph = json!({ "3": { "inputs": { "text": "a 猫 in a café 😀" } } });
        let mut extra = Map::new();
        extra.insert("workflow".into(), json!({ "title": "Straße" }));
        let meta = GenerationMetadata::prepare(Some(&graph), Some(&extra), "", "", &fixed_timestamp());

        let tags = read_ascii_tags(&tiff_block(&meta.exif_fields()));
        let make = &tags.iter().find(|(t, _)| *t == TAG_MAKE).unwrap().1;
        assert!(make.is_ascii());
        let parsed: Value = serde_json::from_str(make.strip_prefix("Prompt: ").unwrap()).unwrap();
        assert_eq!(parsed, graph);

        let description = &tags.iter().find(|(t, _)| *t == TAG_IMAGE_DESCRIPTION).unwrap().1;
        let parsed: Value =
            serde_json::from_str(description.strip_prefix("Workflow: ").unwrap()).unwrap();
        assert_eq!(parsed, json!({ "title": "Straße" }));
    }

    #[test]
    fn extract_parameters_collects_settings_and_prompts() {
        let params = extract_parameters(&sample());
        assert_eq!(params["sampler_name"], json!("euler"));
        assert_eq!(params["steps"], json!("20"));
        assert_eq!(params["positive_prompt"], json!("a cat"));
        assert_eq!(params["negative_prompt"], json!("blurry"));
    }

    #[test]
    fn extract_parameters_without_prompt() {
        let meta = GenerationMetadata::prepare(None, None, "", "", &fixed_timestamp());
        assert!(extract_parameters(&meta).is_empty());
    }
}
