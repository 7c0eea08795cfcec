//! Configuration and data directory management.
//!
//! The engine reads `<data>/regrag.json`; every section falls back to its
//! defaults, and API keys fall back to environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// File extension for persisted department graphs.
pub const GRAPH_FILE_EXT: &str = "graph";

/// Paths to all regrag data locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// One serialized graph per department (`data/graphs/`).
    pub graphs: PathBuf,
    /// Engine configuration (`data/regrag.json`).
    pub config_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            graphs: root.join("graphs"),
            config_file: root.join("regrag.json"),
            root,
        };
        std::fs::create_dir_all(&paths.graphs)?;
        Ok(paths)
    }

    /// Location of a department's serialized graph. The department name is
    /// the file stem, so it must be a single plain path component.
    pub fn graph_file(&self, department: &str) -> Result<PathBuf> {
        validate_department_name(department)?;
        Ok(self.graphs.join(format!("{}.{}", department, GRAPH_FILE_EXT)))
    }
}

/// Reject department names that cannot be a graph file stem: empty names,
/// names with a path separator or NUL, and names starting with `.` or
/// containing `..`.
pub fn validate_department_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains("..")
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || std::path::is_separator(c));
    if invalid {
        return Err(Error::Config(format!("invalid department name {:?}", name)));
    }
    Ok(())
}

/// Graph construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Minimum cosine similarity for a semantic edge.
    pub semantic_threshold: f32,
    /// Semantic neighbours kept per node.
    pub max_edges_per_node: usize,
    /// Node count from which the HNSW index replaces exact pairwise cosine.
    pub ann_min_nodes: usize,
    pub ann_ef_construction: usize,
    pub ann_ef_search: usize,
    /// Taxonomy fields used for metadata edges; the first is the primary field.
    pub taxonomy_fields: Vec<String>,
    pub primary_field_weight: f32,
    pub secondary_field_weight: f32,
    /// Each node links to this many following nodes of the same field value.
    pub metadata_neighbors: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.6,
            max_edges_per_node: 5,
            ann_min_nodes: 2000,
            ann_ef_construction: 100,
            ann_ef_search: 64,
            taxonomy_fields: vec![
                "category".into(),
                "department".into(),
                "education_level".into(),
                "file_type".into(),
            ],
            primary_field_weight: 0.9,
            secondary_field_weight: 0.7,
            metadata_neighbors: 2,
        }
    }
}

impl GraphConfig {
    pub fn primary_field(&self) -> Option<&str> {
        self.taxonomy_fields.first().map(String::as_str)
    }
}

/// Community partitioning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Important nodes per community used for summary and centroid.
    pub top_nodes: usize,
    /// Domain-critical terms rewarded when ranking important nodes.
    pub keyword_bonus_terms: Vec<String>,
    pub keyword_bonus: f32,
    /// Characters kept per snippet in the fallback summary.
    pub fallback_snippet_chars: usize,
    /// Concurrent summarizer calls.
    pub summary_concurrency: usize,
    /// Louvain passes before giving up on improvement.
    pub max_louvain_passes: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            top_nodes: 20,
            keyword_bonus_terms: vec![
                "quy định".into(),
                "điều".into(),
                "khoản".into(),
                "mức".into(),
                "học phí".into(),
                "học bổng".into(),
                "tín chỉ".into(),
                "bảng".into(),
            ],
            keyword_bonus: 50.0,
            fallback_snippet_chars: 200,
            summary_concurrency: 5,
            max_louvain_passes: 10,
        }
    }
}

/// Retrieval and ranking parameters. All weights are tuning defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks returned per query.
    pub k: usize,
    pub route_top_k: usize,
    pub route_min_similarity: f32,
    pub seeds_per_community: usize,
    pub two_hop_sources: usize,
    pub two_hop_cap: usize,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    /// Lexical hits kept for fusion.
    pub bm25_top_n: usize,
    pub semantic_rank_weight: f32,
    pub lexical_rank_weight: f32,
    pub agreement_bonus: f32,
    pub table_multiplier: f32,
    pub rerank_semantic: f32,
    pub rerank_bm25: f32,
    pub rerank_pagerank: f32,
    pub rerank_metadata: f32,
    pub rerank_structural: f32,
    /// Rerank bonus for table nodes on numeric/table-like queries.
    pub table_bonus: f32,
    pub mmr_lambda: f32,
    /// Redundancy penalty factor between direct structural neighbours.
    pub structural_penalty_factor: f32,
    pub query_cache_size: usize,
    pub query_cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 6,
            route_top_k: 5,
            route_min_similarity: 0.25,
            seeds_per_community: 10,
            two_hop_sources: 20,
            two_hop_cap: 50,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            bm25_top_n: 30,
            semantic_rank_weight: 0.85,
            lexical_rank_weight: 0.15,
            agreement_bonus: 120.0,
            table_multiplier: 1.1,
            rerank_semantic: 0.20,
            rerank_bm25: 0.30,
            rerank_pagerank: 0.10,
            rerank_metadata: 0.10,
            rerank_structural: 0.30,
            table_bonus: 0.4,
            mmr_lambda: 0.7,
            structural_penalty_factor: 0.1,
            query_cache_size: 1000,
            query_cache_ttl_secs: 3600,
        }
    }
}

impl RetrievalConfig {
    pub fn query_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.query_cache_ttl_secs)
    }
}

/// External provider endpoints and call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OpenAI-compatible `/embeddings` endpoint; None disables embeddings.
    pub embedding_url: Option<String>,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub embedding_dim: usize,
    /// "auto", "openai", "anthropic" or "groq".
    pub preferred_chat_provider: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_model: String,
    pub groq_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            embedding_url: None,
            embedding_model: "text-embedding-3-small".into(),
            embedding_api_key: None,
            embedding_dim: 1536,
            preferred_chat_provider: "auto".into(),
            openai_api_key: None,
            anthropic_api_key: None,
            groq_api_key: None,
            openai_model: "gpt-4o-mini".into(),
            anthropic_model: "claude-3-5-haiku-20241022".into(),
            groq_model: "llama-3.3-70b-versatile".into(),
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            batch_size: 5,
            inter_batch_delay_ms: 200,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    /// Fill unset keys and endpoints from the environment.
    fn apply_env(&mut self) {
        if self.embedding_url.is_none() {
            self.embedding_url = std::env::var("REGRAG_EMBEDDING_URL").ok();
        }
        if self.openai_api_key.is_none() {
            self.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if self.anthropic_api_key.is_none() {
            self.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        if self.groq_api_key.is_none() {
            self.groq_api_key = std::env::var("GROQ_API_KEY").ok();
        }
        if self.embedding_api_key.is_none() {
            self.embedding_api_key = self.openai_api_key.clone();
        }
    }
}

/// Department routing and access rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepartmentConfig {
    /// Department used when the caller declares none; readable by every role.
    pub general: String,
    /// Department retried once when a specific department yields nothing.
    pub fallback: String,
    pub admin_role: String,
    /// Declared department → departments it may read (besides `general`).
    pub grants: BTreeMap<String, Vec<String>>,
    pub user_metadata_confidence: f32,
    pub general_confidence: f32,
}

impl Default for DepartmentConfig {
    fn default() -> Self {
        let mut grants = BTreeMap::new();
        grants.insert(
            "academic_affairs".to_string(),
            vec!["academic_affairs".to_string(), "student_affairs".to_string()],
        );
        grants.insert(
            "student_affairs".to_string(),
            vec!["student_affairs".to_string(), "academic_affairs".to_string()],
        );
        grants.insert("finance".to_string(), vec!["finance".to_string()]);
        grants.insert(
            "personnel".to_string(),
            vec!["personnel".to_string(), "finance".to_string()],
        );
        grants.insert(
            "research".to_string(),
            vec!["research".to_string(), "academic_affairs".to_string()],
        );
        Self {
            general: "general".into(),
            fallback: "general".into(),
            admin_role: "admin".into(),
            grants,
            user_metadata_confidence: 0.8,
            general_confidence: 0.95,
        }
    }
}

/// Top-level regrag configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub graph: GraphConfig,
    pub partition: PartitionConfig,
    pub retrieval: RetrievalConfig,
    pub providers: ProviderConfig,
    pub departments: DepartmentConfig,
}

impl EngineConfig {
    /// Load config from file, falling back to defaults and env vars.
    pub fn load(config_path: &Path) -> Self {
        let mut config: EngineConfig = match std::fs::read_to_string(config_path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(c) => {
                    info!("Loaded engine config from {}", config_path.display());
                    c
                }
                Err(e) => {
                    warn!(
                        "Invalid config {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    EngineConfig::default()
                }
            },
            Err(_) => EngineConfig::default(),
        };
        config.providers.apply_env();
        config
    }

    /// Save config to disk (API keys included; keep the file private).
    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, serde_json::to_string_pretty(self)?)?;
        info!("Saved engine config to {}", config_path.display());
        Ok(())
    }
}

/// Resolve the data directory from `REGRAG_DATA_DIR`, defaulting to `data/`.
pub fn resolve_data_dir() -> PathBuf {
    std::env::var("REGRAG_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}
