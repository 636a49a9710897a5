//! Typed views of ComfyUI REST responses.
//!
//! ComfyUI responses are loosely structured and vary between node packs,
//! so every model here is lenient: unknown fields are ignored and
//! missing optional fields fall back to defaults.

use serde::Deserialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// POST /prompt
// ---------------------------------------------------------------------------

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation problems that did not block queuing.
    #[serde(default)]
    pub node_errors: Map<String, Value>,
}

/// Structured rejection returned by `/prompt` when the graph fails
/// validation.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptError {
    /// Either an object (`type`, `message`, `details`) or a bare string,
    /// depending on the ComfyUI version.
    pub error: Value,
    #[serde(default)]
    pub node_errors: Map<String, Value>,
}

impl PromptError {
    /// Parse a response body, returning `None` unless it carries an
    /// `error` field.
    pub fn from_body(body: &Value) -> Option<Self> {
        body.get("error")?;
        serde_json::from_value(body.clone()).ok()
    }

    /// Top-level error message.
    pub fn message(&self) -> String {
        match &self.error {
            Value::String(s) => s.clone(),
            Value::Object(obj) => {
                let message = obj.get("message").and_then(Value::as_str).unwrap_or("error");
                match obj.get("details").and_then(Value::as_str) {
                    Some(details) if !details.is_empty() => format!("{message}: {details}"),
                    _ => message.to_string(),
                }
            }
            other => other.to_string(),
        }
    }

    /// One line per failing node, e.g. `Node 6 (KSampler): Value not in list`.
    pub fn node_error_lines(&self) -> Vec<String> {
        self.node_errors
            .iter()
            .map(|(node_id, entry)| {
                let class_type = entry.get("class_type").and_then(Value::as_str);
                let messages: Vec<String> = entry
                    .get("errors")
                    .and_then(Value::as_array)
                    .map(|errors| {
                        errors
                            .iter()
                            .map(|e| {
                                let msg = e.get("message").and_then(Value::as_str).unwrap_or("error");
                                match e.get("details").and_then(Value::as_str) {
                                    Some(d) if !d.is_empty() => format!("{msg} ({d})"),
                                    _ => msg.to_string(),
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_else(|| vec![entry.to_string()]);
                match class_type {
                    Some(ct) => format!("Node {node_id} ({ct}): {}", messages.join("; ")),
                    None => format!("Node {node_id}: {}", messages.join("; ")),
                }
            })
            .collect()
    }

    /// Message plus node errors, newline separated.
    pub fn summary(&self) -> String {
        let mut lines = vec![self.message()];
        lines.extend(self.node_error_lines().into_iter().map(|l| format!("  {l}")));
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// GET /history/{prompt_id}
// ---------------------------------------------------------------------------

/// Status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    /// `"success"` or `"error"`.
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// One prompt's record in the execution history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Output kinds that carry files, with the extension to assume when a
/// file name has none.
const FILE_OUTPUT_KEYS: &[(&str, &str)] = &[
    ("gifs", "mp4"),
    ("videos", "mp4"),
    ("images", "png"),
    ("audio", "flac"),
];

/// A file produced by an output node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub node_id: String,
    pub filename: String,
    pub subfolder: String,
    /// Storage area on the backend, normally `"output"`.
    pub folder_type: String,
    /// Extension to use when `filename` has none.
    pub fallback_extension: &'static str,
}

impl OutputFile {
    /// Extension of the produced file, without the leading dot.
    pub fn extension(&self) -> &str {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or(self.fallback_extension)
    }

    /// Path relative to the backend's output root.
    pub fn relative_path(&self) -> String {
        if self.subfolder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.subfolder, self.filename)
        }
    }
}

impl HistoryEntry {
    pub fn is_error(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.status_str == "error")
    }

    /// True once the backend has finished the prompt without error.
    ///
    /// Older servers omit the status block; non-empty outputs are then
    /// the only completion signal.
    pub fn is_success(&self) -> bool {
        if self.is_error() {
            return false;
        }
        match &self.status {
            Some(s) => s.status_str == "success" || s.completed,
            None => !self.outputs.is_empty(),
        }
    }

    /// Human-readable description of an execution error.
    pub fn error_detail(&self) -> String {
        let Some(status) = &self.status else {
            return "execution failed".to_string();
        };

        let errors: Vec<String> = status
            .messages
            .iter()
            .filter_map(|m| {
                let pair = m.as_array()?;
                if pair.first()?.as_str()? != "execution_error" {
                    return None;
                }
                let data = pair.get(1)?;
                let field = |k: &str| data.get(k).and_then(Value::as_str).unwrap_or("");
                let node = match data.get("node_id") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "?".to_string(),
                };
                Some(format!(
                    "Node {node} ({}): {}: {}",
                    field("node_type"),
                    field("exception_type"),
                    field("exception_message").trim(),
                ))
            })
            .collect();

        if errors.is_empty() {
            format!("execution failed (status: {})", status.status_str)
        } else {
            errors.join("\n")
        }
    }

    /// Raw error payloads, for callers that want the full detail.
    pub fn error_payload(&self) -> Value {
        match &self.status {
            Some(s) => Value::Array(s.messages.clone()),
            None => Value::Null,
        }
    }

    /// Every saved file across all output nodes. Temporary previews are
    /// skipped.
    pub fn output_files(&self) -> Vec<OutputFile> {
        let mut files = Vec::new();
        for (node_id, output) in &self.outputs {
            for &(key, fallback) in FILE_OUTPUT_KEYS {
                let Some(items) = output.get(key).and_then(Value::as_array) else {
                    continue;
                };
                for item in items {
                    let Some(filename) = item.get("filename").and_then(Value::as_str) else {
                        continue;
                    };
                    let folder_type = item
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("output");
                    if folder_type == "temp" {
                        continue;
                    }
                    files.push(OutputFile {
                        node_id: node_id.clone(),
                        filename: filename.to_string(),
                        subfolder: item
                            .get("subfolder")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        folder_type: folder_type.to_string(),
                        fallback_extension: fallback,
                    });
                }
            }
        }
        files
    }
}

/// Extract the entry for `prompt_id` from a `/history/{id}` body.
///
/// Returns `Ok(None)` when the prompt has no history yet.
pub fn parse_history(body: &Value, prompt_id: &str) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match body.get(prompt_id) {
        Some(entry) => serde_json::from_value(entry.clone()).map(Some),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// GET /queue
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawQueue {
    #[serde(default)]
    queue_running: Vec<Vec<Value>>,
    #[serde(default)]
    queue_pending: Vec<Vec<Value>>,
}

/// Prompt ids currently executing and waiting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawQueue")]
pub struct QueueSnapshot {
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

impl From<RawQueue> for QueueSnapshot {
    fn from(raw: RawQueue) -> Self {
        // Queue items are `[number, prompt_id, prompt, extra_data, outputs]`.
        let ids = |items: Vec<Vec<Value>>| -> Vec<String> {
            items
                .into_iter()
                .filter_map(|item| item.get(1).and_then(Value::as_str).map(str::to_string))
                .collect()
        };
        Self {
            running: ids(raw.queue_running),
            pending: ids(raw.queue_pending),
        }
    }
}

impl QueueSnapshot {
    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.running.iter().any(|id| id == prompt_id)
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        self.pending.iter().any(|id| id == prompt_id)
    }

    /// Zero-based position among pending prompts.
    pub fn pending_position(&self, prompt_id: &str) -> Option<usize> {
        self.pending.iter().position(|id| id == prompt_id)
    }
}

// ---------------------------------------------------------------------------
// POST /upload/image
// ---------------------------------------------------------------------------

/// Response from the image upload endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default, rename = "type")]
    pub folder_type: String,
}

impl UploadResponse {
    /// Reference usable as a `LoadImage` input.
    pub fn reference(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}
