//! Filename and folder-name templates.
//!
//! A template is a comma-separated key list, for example
//! `sampler_name, cfg, steps, %F %H-%M-%S`. Each key resolves to a piece of
//! text; the pieces are joined with the configured delimiter after an
//! optional prefix.
//!
//! ## Key kinds
//!
//! | Key | Resolves to |
//! |---|---|
//! | `%Y-%m-%d`, `%F %H-%M-%S` | the batch timestamp, strftime-formatted |
//! | `./name`, `../name` | the literal `name`, joined with `/` (folders only) |
//! | `5.seed` | input `seed` of node `5` |
//! | `sampler_name` | first input of that name anywhere in the workflow |
//!
//! Keys that resolve to nothing (missing parameter, bad strftime format) are
//! skipped without leaving a stray delimiter behind.
//!
//! ## Cleaning
//!
//! Workflow values are made filesystem-safe before joining: a trailing model
//! extension is removed (`sd_xl_base.safetensors` → `sd_xl_base`), characters
//! Windows rejects are replaced with `_`, and surrounding whitespace is
//! trimmed. The joined name then loses leading/trailing delimiters, dots and
//! slashes.

use crate::cache::{CacheStats, MemoCache};
use crate::workflow::{self, WorkflowRef};
use chrono::NaiveDateTime;
use std::fmt::Write;
use std::time::Duration;

/// Name used when a filename template resolves to nothing at all.
pub const FALLBACK_NAME: &str = "ComfyUI";

/// Extensions stripped from model file names before they enter a name.
const MODEL_EXTENSIONS: &[&str] = &[".safetensors", ".ckpt", ".pt", ".bin", ".pth"];

/// Characters that are not allowed in Windows file names.
pub(crate) const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\'];

/// What a resolved template is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// A single file name: `/` never survives.
    File,
    /// A folder path: `/` separates nested folders.
    Folder,
}

/// One parsed template key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKey {
    /// strftime format, e.g. `%Y-%m-%d`.
    Timestamp(String),
    /// Literal folder segment from `./name` or `../name`.
    PathSegment(String),
    /// `node.input` reference.
    NodeInput { node: String, input: String },
    /// Parameter name searched anywhere in the workflow.
    Parameter(String),
    /// Dotted key that is not a valid node reference. Resolves to nothing.
    Malformed(String),
}

impl TemplateKey {
    /// Classify a single trimmed key.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with('%') {
            return TemplateKey::Timestamp(raw.to_string());
        }
        if let Some(rest) = raw.strip_prefix("./") {
            return TemplateKey::PathSegment(rest.to_string());
        }
        if let Some(rest) = raw.strip_prefix("../") {
            return TemplateKey::PathSegment(rest.to_string());
        }
        if raw.contains('.') {
            let parts: Vec<&str> = raw.split('.').collect();
            if parts.len() == 2
                && !parts[0].is_empty()
                && parts[0].chars().all(|c| c.is_ascii_digit())
            {
                return TemplateKey::NodeInput {
                    node: parts[0].to_string(),
                    input: parts[1].to_string(),
                };
            }
            return TemplateKey::Malformed(raw.to_string());
        }
        TemplateKey::Parameter(raw.to_string())
    }

    /// Resolve a workflow-backed key against the graph.
    ///
    /// Returns `None` for keys that do not come from the workflow.
    pub fn lookup(&self, graph: &serde_json::Value) -> Option<String> {
        let value = match self {
            TemplateKey::NodeInput { node, input } => workflow::node_input(graph, node, input)?,
            TemplateKey::Parameter(name) => workflow::find_key(graph, name)?,
            _ => return None,
        };
        workflow::value_to_string(value)
    }

    /// Cache key for workflow-backed keys.
    fn cache_key(&self) -> Option<String> {
        match self {
            TemplateKey::NodeInput { node, input } => Some(format!("{node}.{input}")),
            TemplateKey::Parameter(name) => Some(name.clone()),
            _ => None,
        }
    }
}

/// Split a comma-separated key list into trimmed, non-empty keys.
pub fn split_keys(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Format `timestamp` with a strftime pattern.
///
/// Returns `None` when the pattern contains an invalid specifier.
pub fn format_timestamp(pattern: &str, timestamp: &NaiveDateTime) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", timestamp.format(pattern)).ok()?;
    Some(out)
}

/// Make a workflow value safe to embed in a name.
pub fn clean_value(value: &str, kind: NameKind) -> String {
    let mut trimmed = value;
    for ext in MODEL_EXTENSIONS {
        if let Some(stripped) = trimmed.strip_suffix(ext) {
            trimmed = stripped;
            break;
        }
    }
    let cleaned: String = trimmed
        .chars()
        .map(|c| {
            if INVALID_NAME_CHARS.contains(&c) || (kind == NameKind::File && c == '/') {
                '_'
            } else {
                c
            }
        })
        .collect();
    cleaned.trim().to_string()
}

/// Strip delimiter characters, dots and slashes from both ends of a joined name.
///
/// The result may be empty; callers decide on the fallback.
pub fn clean_final_name(name: &str, delimiter: &str) -> String {
    let delim: Vec<char> = delimiter.chars().collect();
    name.trim_matches(|c| delim.contains(&c))
        .trim_matches('.')
        .trim_matches('/')
        .trim_matches(|c| delim.contains(&c))
        .to_string()
}

/// Resolves templates against workflows, memoizing parses and lookups.
#[derive(Debug)]
pub struct TemplateResolver {
    parsed: MemoCache<Vec<TemplateKey>>,
    lookups: MemoCache<Option<String>>,
}

impl TemplateResolver {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            parsed: MemoCache::new(max_entries, ttl),
            lookups: MemoCache::new(max_entries, ttl),
        }
    }

    /// Parse a key list, reusing the previous parse of the same string.
    pub fn parse(&self, template: &str) -> Vec<TemplateKey> {
        self.parsed.get_or_insert_with(template, || {
            split_keys(template)
                .iter()
                .map(|k| TemplateKey::parse(k))
                .collect()
        })
    }

    fn lookup(&self, key: &TemplateKey, workflow: &WorkflowRef<'_>) -> Option<String> {
        let id = key.cache_key()?;
        let cache_key = format!("{}:{}", workflow.fingerprint, id);
        self.lookups
            .get_or_insert_with(&cache_key, || key.lookup(workflow.graph))
    }

    /// Resolve `template` into a name.
    ///
    /// An empty file name falls back to [`FALLBACK_NAME`]; an empty folder
    /// name stays empty, meaning the output root.
    pub fn resolve(
        &self,
        template: &str,
        prefix: &str,
        delimiter: &str,
        kind: NameKind,
        workflow: &WorkflowRef<'_>,
        timestamp: &NaiveDateTime,
    ) -> String {
        let mut name = prefix.to_string();

        for key in self.parse(template) {
            let (value, joiner) = match &key {
                TemplateKey::Timestamp(pattern) => {
                    (format_timestamp(pattern, timestamp), delimiter)
                }
                TemplateKey::PathSegment(segment) => match kind {
                    NameKind::Folder => (Some(segment.clone()), "/"),
                    NameKind::File => (Some(clean_value(segment, kind)), delimiter),
                },
                TemplateKey::NodeInput { .. } | TemplateKey::Parameter(_) => (
                    self.lookup(&key, workflow).map(|v| clean_value(&v, kind)),
                    delimiter,
                ),
                TemplateKey::Malformed(_) => (None, delimiter),
            };

            let Some(mut value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            if kind == NameKind::File {
                value = value.replace('/', "_");
            }
            if !name.is_empty() && !name.ends_with('/') {
                name.push_str(joiner);
            }
            name.push_str(&value);
        }

        let cleaned = clean_final_name(&name, delimiter);
        if cleaned.is_empty() && kind == NameKind::File {
            FALLBACK_NAME.to_string()
        } else {
            cleaned
        }
    }

    /// Combined stats of the parse and lookup caches.
    pub fn stats(&self) -> CacheStats {
        self.parsed.stats().merged(&self.lookups.stats())
    }

    pub fn clear(&self) {
        self.parsed.clear();
        self.lookups.clear();
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new(
            crate::cache::DEFAULT_MAX_ENTRIES,
            crate::cache::DEFAULT_TTL,
        )
    }
}
