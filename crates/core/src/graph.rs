//! Opaque wrapper around a backend computation graph.
//!
//! A graph is a JSON object mapping node ids to node documents. Beyond
//! that, the client assumes nothing about its shape: unknown fields are
//! carried through untouched. The only structure the client understands
//! is the placeholder convention: a string value of the exact form
//! `"{{role}}"` marks the location a [`Role`] is bound into.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Semantic slot a template exposes for binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Prompt,
    NegativePrompt,
    Width,
    Height,
    FrameCount,
    StepCount,
    /// Step at which a two-stage sampler hands over to the second model.
    SplitStep,
    GuidanceScale,
    Seed,
    /// Backend reference of the uploaded input image.
    Image,
    OutputPrefix,
}

impl Role {
    pub const ALL: [Role; 11] = [
        Self::Prompt,
        Self::NegativePrompt,
        Self::Width,
        Self::Height,
        Self::FrameCount,
        Self::StepCount,
        Self::SplitStep,
        Self::GuidanceScale,
        Self::Seed,
        Self::Image,
        Self::OutputPrefix,
    ];

    /// Name used inside the `{{...}}` marker.
    pub fn key(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::NegativePrompt => "negative_prompt",
            Self::Width => "width",
            Self::Height => "height",
            Self::FrameCount => "frame_count",
            Self::StepCount => "step_count",
            Self::SplitStep => "split_step",
            Self::GuidanceScale => "guidance_scale",
            Self::Seed => "seed",
            Self::Image => "image",
            Self::OutputPrefix => "output_prefix",
        }
    }

    pub fn from_key(key: &str) -> Option<Role> {
        Self::ALL.into_iter().find(|r| r.key() == key)
    }

    pub fn marker(self) -> String {
        format!("{{{{{}}}}}", self.key())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Extract the key from a `{{key}}` marker, if `s` is one.
pub fn placeholder_key(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let valid = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(inner)
}

/// A placeholder occurrence: its key and the JSON pointer to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub key: String,
    pub pointer: String,
}

/// Walk `value` collecting every placeholder marker with its location.
pub fn scan_placeholders(value: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    walk(value, &mut String::new(), &mut found);
    found
}

fn walk(value: &Value, path: &mut String, found: &mut Vec<Placeholder>) {
    match value {
        Value::String(s) => {
            if let Some(key) = placeholder_key(s) {
                found.push(Placeholder {
                    key: key.to_string(),
                    pointer: path.clone(),
                });
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                let len = path.len();
                path.push('/');
                path.push_str(&escape_pointer_token(k));
                walk(v, path, found);
                path.truncate(len);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let len = path.len();
                path.push('/');
                path.push_str(&i.to_string());
                walk(v, path, found);
                path.truncate(len);
            }
        }
        _ => {}
    }
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// An immutable graph template for one mode.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphTemplate {
    name: String,
    document: Map<String, Value>,
}

impl GraphTemplate {
    /// Wrap a parsed document. The top level must be a non-empty object
    /// of nodes.
    pub fn new(name: impl Into<String>, document: Value) -> Result<Self, CoreError> {
        let name = name.into();
        match document {
            Value::Object(map) if !map.is_empty() => Ok(Self {
                name,
                document: map,
            }),
            Value::Object(_) => Err(CoreError::InvalidTemplate(format!(
                "{name}: graph has no nodes"
            ))),
            _ => Err(CoreError::InvalidTemplate(format!(
                "{name}: top level must be an object of nodes"
            ))),
        }
    }

    /// Parse a template from JSON text.
    pub fn from_json(name: impl Into<String>, text: &str) -> Result<Self, CoreError> {
        let name = name.into();
        let document: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::InvalidTemplate(format!("{name}: {e}")))?;
        Self::new(name, document)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_count(&self) -> usize {
        self.document.len()
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    pub fn placeholders(&self) -> Vec<Placeholder> {
        scan_placeholders(&Value::Object(self.document.clone()))
    }

    /// JSON pointers of every location designated for `role`.
    pub fn locations(&self, role: Role) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|p| p.key == role.key())
            .map(|p| p.pointer)
            .collect()
    }

    pub fn has_location(&self, role: Role) -> bool {
        !self.locations(role).is_empty()
    }
}

// ---------------------------------------------------------------------------
// Bound graph
// ---------------------------------------------------------------------------

/// A template with every placeholder replaced by a concrete value.
///
/// Remembers where each role was written so callers can read bound
/// values back without knowing the graph's node layout.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundGraph {
    document: Value,
    locations: BTreeMap<Role, Vec<String>>,
}

impl BoundGraph {
    pub(crate) fn new(document: Value, locations: BTreeMap<Role, Vec<String>>) -> Self {
        Self {
            document,
            locations,
        }
    }

    /// The document to submit.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    /// Value bound for `role`, read from its first location.
    pub fn value(&self, role: Role) -> Option<&Value> {
        let pointer = self.locations.get(&role)?.first()?;
        self.document.pointer(pointer)
    }

    pub fn width(&self) -> Option<u64> {
        self.value(Role::Width)?.as_u64()
    }

    pub fn height(&self) -> Option<u64> {
        self.value(Role::Height)?.as_u64()
    }

    pub fn frame_count(&self) -> Option<u64> {
        self.value(Role::FrameCount)?.as_u64()
    }

    pub fn step_count(&self) -> Option<u64> {
        self.value(Role::StepCount)?.as_u64()
    }

    pub fn guidance_scale(&self) -> Option<f64> {
        self.value(Role::GuidanceScale)?.as_f64()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.value(Role::Prompt)?.as_str()
    }

    pub fn image(&self) -> Option<&str> {
        self.value(Role::Image)?.as_str()
    }

    /// Any markers still present. Empty for a correctly bound graph.
    pub fn unresolved_placeholders(&self) -> Vec<Placeholder> {
        scan_placeholders(&self.document)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn placeholder_key_parsing() {
        assert_eq!(placeholder_key("{{prompt}}"), Some("prompt"));
        assert_eq!(placeholder_key("{{ seed }}"), Some("seed"));
        assert_eq!(placeholder_key("{{}}"), None);
        assert_eq!(placeholder_key("a {{prompt}}"), None);
        assert_eq!(placeholder_key("{{two words}}"), None);
        assert_eq!(placeholder_key("plain"), None);
    }

    #[test]
    fn role_marker_round_trips() {
        for role in Role::ALL {
            assert_eq!(placeholder_key(&role.marker()), Some(role.key()));
            assert_eq!(Role::from_key(role.key()), Some(role));
        }
    }

    #[test]
    fn scan_finds_nested_locations() {
        let doc = json!({
            "3": {"class_type": "CLIPTextEncode", "inputs": {"text": "{{prompt}}"}},
            "a/b": {"inputs": {"list": [1, "{{seed}}"]}}
        });
        let mut found = scan_placeholders(&doc);
        found.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].key, "prompt");
        assert_eq!(found[0].pointer, "/3/inputs/text");
        assert_eq!(found[1].key, "seed");
        assert_eq!(found[1].pointer, "/a~1b/inputs/list/1");
        assert_eq!(doc.pointer(&found[1].pointer), Some(&json!("{{seed}}")));
    }

    #[test]
    fn template_rejects_non_object() {
        assert!(GraphTemplate::new("x", json!([1, 2])).is_err());
        assert!(GraphTemplate::new("x", json!({})).is_err());
        assert!(GraphTemplate::from_json("x", "{not json").is_err());
    }

    #[test]
    fn template_locations() {
        let t = GraphTemplate::new(
            "t",
            json!({
                "1": {"inputs": {"noise_seed": "{{seed}}"}},
                "2": {"inputs": {"noise_seed": "{{seed}}", "width": "{{width}}"}}
            }),
        )
        .unwrap();
        assert_eq!(t.locations(Role::Seed).len(), 2);
        assert!(t.has_location(Role::Width));
        assert!(!t.has_location(Role::Image));
        assert_eq!(t.node_count(), 2);
    }
}
