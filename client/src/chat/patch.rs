//! Patch stream assembly.
//!
//! The answer is not a single payload: the service streams an ordered
//! sequence of partial-update batches against a shared run document. Each
//! batch is applied to a copy of the last good snapshot, so a malformed
//! batch aborts the turn without corrupting what is already on screen.
//!
//! The assembler also projects the three fields the UI renders out of the
//! document: the concatenated answer text, the retrieved source list of the
//! configured retrieval step, and the run correlation id. Projections are
//! monotonic — once populated they never regress when an unrelated batch
//! arrives.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::chat::message::Source;

/// A single structural edit to the streamed run document.
///
/// Paths are slash-delimited pointers; `-` appends to an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: JsonValue },
    Replace { path: String, value: JsonValue },
    Remove { path: String },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: JsonValue },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::Test { path, .. } => path,
        }
    }
}

/// A patch operation targets a path that is invalid for the current
/// document shape. Terminates the turn; the last good snapshot is kept.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("{op} target does not exist: {path}")]
    MissingPath { op: &'static str, path: String },

    #[error("invalid pointer: {path}")]
    BadPointer { path: String },

    #[error("array index out of bounds: {path}")]
    BadIndex { path: String },

    #[error("test failed at {path}")]
    TestFailed { path: String },
}

impl PatchError {
    fn missing(op: &'static str, path: &str) -> Self {
        Self::MissingPath {
            op,
            path: path.to_string(),
        }
    }
}

// ============================================================================
// POINTER RESOLUTION
// ============================================================================

/// Split a slash-delimited pointer into unescaped segments.
/// The empty pointer addresses the document root.
fn split_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::BadPointer {
            path: path.to_string(),
        });
    };
    Ok(rest
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn lookup<'a>(doc: &'a JsonValue, segments: &[String]) -> Option<&'a JsonValue> {
    let mut current = doc;
    for segment in segments {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn lookup_mut<'a>(doc: &'a mut JsonValue, segments: &[String]) -> Option<&'a mut JsonValue> {
    let mut current = doc;
    for segment in segments {
        current = match current {
            JsonValue::Object(map) => map.get_mut(segment)?,
            JsonValue::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Descend one level for `add`, creating the missing container. Whether an
/// object or an array is created depends on the following segment.
fn descend_or_create<'a>(
    current: &'a mut JsonValue,
    segment: &str,
    next_is_index: bool,
    path: &str,
) -> Result<&'a mut JsonValue, PatchError> {
    let empty = || {
        if next_is_index {
            JsonValue::Array(Vec::new())
        } else {
            JsonValue::Object(serde_json::Map::new())
        }
    };

    match current {
        JsonValue::Object(map) => Ok(map.entry(segment.to_string()).or_insert_with(empty)),
        JsonValue::Array(items) => {
            let index = segment.parse::<usize>().map_err(|_| PatchError::BadIndex {
                path: path.to_string(),
            })?;
            while items.len() <= index {
                items.push(JsonValue::Null);
            }
            let slot = &mut items[index];
            if slot.is_null() {
                *slot = empty();
            }
            Ok(slot)
        }
        _ => Err(PatchError::BadPointer {
            path: path.to_string(),
        }),
    }
}

fn insert(parent: &mut JsonValue, segment: &str, value: JsonValue, path: &str) -> Result<(), PatchError> {
    match parent {
        JsonValue::Object(map) => {
            map.insert(segment.to_string(), value);
            Ok(())
        }
        JsonValue::Array(items) => {
            if segment == "-" {
                items.push(value);
                return Ok(());
            }
            let index = segment.parse::<usize>().map_err(|_| PatchError::BadIndex {
                path: path.to_string(),
            })?;
            if index > items.len() {
                return Err(PatchError::BadIndex {
                    path: path.to_string(),
                });
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::BadPointer {
            path: path.to_string(),
        }),
    }
}

fn add(doc: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), PatchError> {
    let segments = split_pointer(path)?;
    let Some((last, parents)) = segments.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut current = doc;
    for (i, segment) in parents.iter().enumerate() {
        let next = parents.get(i + 1).unwrap_or(last);
        let next_is_index = next == "-" || next.parse::<usize>().is_ok();
        current = descend_or_create(current, segment, next_is_index, path)?;
    }
    insert(current, last, value, path)
}

fn replace(doc: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), PatchError> {
    let segments = split_pointer(path)?;
    if segments.is_empty() {
        *doc = value;
        return Ok(());
    }
    let slot = lookup_mut(doc, &segments).ok_or_else(|| PatchError::missing("replace", path))?;
    *slot = value;
    Ok(())
}

fn remove(doc: &mut JsonValue, path: &str) -> Result<JsonValue, PatchError> {
    let segments = split_pointer(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Err(PatchError::BadPointer {
            path: path.to_string(),
        });
    };
    let parent = lookup_mut(doc, parents).ok_or_else(|| PatchError::missing("remove", path))?;
    match parent {
        JsonValue::Object(map) => map
            .remove(last)
            .ok_or_else(|| PatchError::missing("remove", path)),
        JsonValue::Array(items) => {
            let index = last
                .parse::<usize>()
                .map_err(|_| PatchError::missing("remove", path))?;
            if index < items.len() {
                Ok(items.remove(index))
            } else {
                Err(PatchError::missing("remove", path))
            }
        }
        _ => Err(PatchError::missing("remove", path)),
    }
}

fn apply_op(doc: &mut JsonValue, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } => add(doc, path, value.clone()),
        PatchOp::Replace { path, value } => replace(doc, path, value.clone()),
        PatchOp::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOp::Move { from, path } => {
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOp::Copy { from, path } => {
            let segments = split_pointer(from)?;
            let value = lookup(doc, &segments)
                .cloned()
                .ok_or_else(|| PatchError::missing("copy", from))?;
            add(doc, path, value)
        }
        PatchOp::Test { path, value } => {
            let segments = split_pointer(path)?;
            let found = lookup(doc, &segments).ok_or_else(|| PatchError::missing("test", path))?;
            if found == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed {
                    path: path.to_string(),
                })
            }
        }
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

/// Assembles the run document from patch batches and projects the fields the
/// UI renders.
///
/// Batching is transparent: applying N batches yields the same document as
/// applying all their operations in order in one batch.
#[derive(Debug)]
pub struct AnswerAssembler {
    snapshot: JsonValue,
    source_step: String,
    text: String,
    sources: Vec<Source>,
    run_id: Option<String>,
}

impl AnswerAssembler {
    /// `source_step` names the retrieval step whose final output carries the
    /// source documents for this turn.
    pub fn new(source_step: impl Into<String>) -> Self {
        Self {
            snapshot: JsonValue::Object(serde_json::Map::new()),
            source_step: source_step.into(),
            text: String::new(),
            sources: Vec::new(),
            run_id: None,
        }
    }

    /// Apply one batch in arrival order.
    ///
    /// On error the previous snapshot and projections are kept untouched and
    /// the error is returned for the session to surface.
    pub fn apply_batch(&mut self, ops: &[PatchOp]) -> Result<(), PatchError> {
        let mut next = self.snapshot.clone();
        for op in ops {
            apply_op(&mut next, op)?;
        }
        self.snapshot = next;
        self.refresh_projections();
        Ok(())
    }

    fn refresh_projections(&mut self) {
        if let Some(parts) = self
            .snapshot
            .get("streamed_output")
            .and_then(JsonValue::as_array)
            && parts.iter().all(JsonValue::is_string)
        {
            self.text = parts.iter().filter_map(JsonValue::as_str).collect();
        }

        if let Some(id) = self.snapshot.get("id").and_then(JsonValue::as_str) {
            // The service contract says the run id never changes mid-stream.
            self.run_id = Some(id.to_string());
        }

        let output_pointer = format!("/logs/{}/final_output/output", self.source_step);
        if let Some(documents) = self
            .snapshot
            .pointer(&output_pointer)
            .and_then(JsonValue::as_array)
        {
            self.sources = documents
                .iter()
                .map(|descriptor| Source {
                    url: descriptor_field(descriptor, "source"),
                    title: descriptor_field(descriptor, "crumbs"),
                })
                .collect();
        }
    }

    /// Concatenated answer text. Empty until `streamed_output` appears.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Retrieved sources in descriptor order, pre-deduplication. Empty until
    /// the retrieval step completes.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Run correlation id, once the document's top-level `id` is observed.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Last good snapshot of the run document.
    pub fn document(&self) -> &JsonValue {
        &self.snapshot
    }
}

fn descriptor_field(descriptor: &JsonValue, field: &str) -> String {
    descriptor
        .pointer(&format!("/metadata/{field}"))
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}
