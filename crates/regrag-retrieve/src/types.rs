//! Retrieval result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use regrag_graph::NodeId;

/// Per-signal scores kept on every returned chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Cosine similarity to the query; 0 for nodes without an embedding.
    pub semantic: f32,
    pub bm25: f32,
    /// Normalised to [0, 1] by the graph maximum.
    pub pagerank: f32,
    pub metadata_match: f32,
    pub structural: f32,
    /// Rank-fusion score the candidates were ordered by before diversity.
    pub fused: f32,
    /// MMR value the chunk was selected at; non-increasing down a result list.
    #[serde(rename = "final")]
    pub final_score: f32,
}

/// A ranked chunk returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub node_id: NodeId,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    /// Set on cross-department results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub scores: ScoreBreakdown,
}

impl RetrievedChunk {
    /// Tag the chunk with the department it came from.
    pub fn tagged(mut self, department: &str) -> Self {
        self.content = format!("[{}] {}", department, self.content);
        self.department = Some(department.to_string());
        self
    }
}
