//! Department decision and query result types.

use serde::{Deserialize, Serialize};

use regrag_retrieve::RetrievedChunk;

/// Where a department signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    UserMetadata,
    QueryKeyword,
    SemanticSimilarity,
}

impl SignalSource {
    /// Vote weight in conflict resolution.
    pub fn weight(self) -> f32 {
        match self {
            SignalSource::SemanticSimilarity => 2.0,
            SignalSource::UserMetadata => 1.5,
            SignalSource::QueryKeyword => 1.0,
        }
    }

    /// Tie-break priority; higher wins.
    pub fn priority(self) -> u8 {
        match self {
            SignalSource::SemanticSimilarity => 3,
            SignalSource::UserMetadata => 2,
            SignalSource::QueryKeyword => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub department: String,
    pub confidence: f32,
    pub source: SignalSource,
}

impl Signal {
    pub fn new(department: impl Into<String>, confidence: f32, source: SignalSource) -> Self {
        Self {
            department: department.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }
}

/// Which department graph a query must use, and whether the caller may.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentDecision {
    pub chosen_department: String,
    pub confidence: f32,
    pub conflict_detected: bool,
    pub permission_granted: bool,
    pub signals: Vec<Signal>,
}

/// Caller-supplied metadata, trusted as given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerMetadata {
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl CallerMetadata {
    pub fn new(department: Option<&str>, role: Option<&str>) -> Self {
        Self {
            department: department.map(str::to_string),
            role: role.map(str::to_string),
        }
    }

    /// Declared department, blank values treated as absent.
    pub fn declared_department(&self) -> Option<&str> {
        self.department
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Ok,
    PermissionDenied,
    NoResults,
    /// The chosen department had nothing; the fallback department answered.
    FellBack,
}

/// Result of a department-scoped retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub chunks: Vec<RetrievedChunk>,
    /// Department whose graph produced `chunks`.
    pub department: Option<String>,
    pub status: QueryStatus,
}

impl QueryOutcome {
    pub fn empty(status: QueryStatus) -> Self {
        Self {
            chunks: Vec::new(),
            department: None,
            status,
        }
    }
}

/// What the query entry point hands back to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub decision: DepartmentDecision,
    pub chunks: Vec<RetrievedChunk>,
    pub status: QueryStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}
