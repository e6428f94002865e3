// Task record and the persisted blob codec

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// One to-do item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// Create an open task. Callers are expected to pass already-trimmed, non-empty text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            completed: false,
        }
    }
}

/// Serialize the whole ordered collection into a single blob
pub fn encode_tasks(tasks: &[Task]) -> Result<String> {
    serde_json::to_string(tasks).context("Failed to serialize task list")
}

/// Deserialize a blob produced by `encode_tasks`
///
/// Anything that is not a JSON array of task objects is an error; the store
/// turns that into an empty collection.
pub fn decode_tasks(blob: &str) -> Result<Vec<Task>> {
    serde_json::from_str(blob).context("Failed to parse task list blob")
}
