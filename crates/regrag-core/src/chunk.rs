//! Input unit handed to the graph builder by the upstream loading pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the source-file identifier used for structural edges.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the department assigned by the loading pipeline.
pub const DEPARTMENT_KEY: &str = "department";
/// Metadata key flagging chunks that contain tabular content.
pub const TABLE_KEY: &str = "contains_table";

/// A bounded span of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style metadata insertion.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    /// Department folder signal; empty values count as absent.
    pub fn department(&self) -> Option<&str> {
        self.metadata
            .get(DEPARTMENT_KEY)
            .map(String::as_str)
            .filter(|d| !d.trim().is_empty())
    }
}
