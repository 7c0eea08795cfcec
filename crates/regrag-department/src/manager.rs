//! One independent graph, community table and retriever per department.
//!
//! Loaded indexes are immutable and shared as `Arc`s; a rebuild produces a
//! fresh index and swaps it in under the write lock, so queries in flight
//! keep the index they started with.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use regrag_core::config::{validate_department_name, GRAPH_FILE_EXT};
use regrag_core::{DataPaths, DocumentChunk, EngineConfig, Error, Result};
use regrag_graph::persist::{self, GraphFile};
use regrag_graph::vector::weighted_mean;
use regrag_graph::{BuiltGraph, CommunityPartitioner, Graph, GraphStats, GraphStore};
use regrag_infer::{BatchEmbedder, EmbeddingProvider, GenerationProvider};
use regrag_retrieve::{HybridRetriever, RetrievedChunk};

use crate::permissions::PermissionTable;
use crate::types::{CallerMetadata, DepartmentDecision, QueryOutcome, QueryStatus};

/// Graph, communities and retriever of one department.
pub struct DepartmentIndex {
    pub department: String,
    pub graph: Graph,
    pub partitioner: CommunityPartitioner,
    pub retriever: HybridRetriever,
}

impl DepartmentIndex {
    pub fn stats(&self) -> GraphStats {
        self.graph.stats()
    }

    /// Size-weighted mean of the community centroids.
    pub fn representative_embedding(&self) -> Option<Vec<f32>> {
        weighted_mean(
            self.partitioner
                .communities()
                .filter(|c| !c.centroid.is_empty())
                .map(|c| (c.centroid.as_slice(), c.len() as f32)),
        )
    }
}

pub struct DepartmentGraphManager {
    config: EngineConfig,
    paths: DataPaths,
    store: GraphStore,
    embedder: BatchEmbedder,
    permissions: PermissionTable,
    indexes: RwLock<HashMap<String, Arc<DepartmentIndex>>>,
}

impl DepartmentGraphManager {
    pub fn new(
        config: EngineConfig,
        paths: DataPaths,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let store = GraphStore::from_config(&config, Arc::clone(&embedder), generator);
        let batch = BatchEmbedder::from_config(embedder, &config.providers);
        let permissions = PermissionTable::from_config(&config.departments);
        Self {
            config,
            paths,
            store,
            embedder: batch,
            permissions,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn embedder(&self) -> &BatchEmbedder {
        &self.embedder
    }

    /// Loaded departments, sorted.
    pub fn departments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, department: &str) -> Option<Arc<DepartmentIndex>> {
        self.indexes.read().get(department).cloned()
    }

    /// Swap in an index, replacing any previous one.
    pub fn insert(&self, index: DepartmentIndex) -> Option<Arc<DepartmentIndex>> {
        let department = index.department.clone();
        self.indexes.write().insert(department, Arc::new(index))
    }

    /// Group chunks by their department field. Chunks without one, or whose
    /// department cannot name a graph file, are dropped.
    pub fn group_by_department(chunks: Vec<DocumentChunk>) -> BTreeMap<String, Vec<DocumentChunk>> {
        let mut groups: BTreeMap<String, Vec<DocumentChunk>> = BTreeMap::new();
        let mut skipped = 0usize;
        for chunk in chunks {
            match chunk.department().map(|d| d.trim().to_string()) {
                Some(department) => match validate_department_name(&department) {
                    Ok(()) => groups.entry(department).or_default().push(chunk),
                    Err(e) => warn!("Dropping chunk: {}", e),
                },
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            info!("{} chunks without a department excluded from department graphs", skipped);
        }
        groups
    }

    fn make_index(&self, department: &str, built: BuiltGraph) -> DepartmentIndex {
        DepartmentIndex {
            department: department.to_string(),
            graph: built.graph,
            partitioner: built.partitioner,
            retriever: HybridRetriever::new(
                self.config.retrieval.clone(),
                self.config.graph.taxonomy_fields.clone(),
            ),
        }
    }

    /// Build, persist and install one graph per department. Departments with
    /// no chunks, or whose build fails, are absent from the returned map of
    /// department to node count.
    pub async fn build_all(
        &self,
        documents_by_department: BTreeMap<String, Vec<DocumentChunk>>,
    ) -> BTreeMap<String, usize> {
        let mut built = BTreeMap::new();
        for (department, chunks) in documents_by_department {
            if chunks.is_empty() {
                debug!("Skipping department '{}': no documents", department);
                continue;
            }
            match self.build_department(&department, chunks).await {
                Ok(nodes) => {
                    built.insert(department, nodes);
                }
                Err(e) => error!("Failed to build department '{}': {}", department, e),
            }
        }
        info!("Built {} department graphs", built.len());
        built
    }

    async fn build_department(&self, department: &str, chunks: Vec<DocumentChunk>) -> Result<usize> {
        let path = self.paths.graph_file(department)?;
        let built = self.store.build(chunks).await?;
        persist::save(&path, &GraphFile::from_built(department, &built))?;
        let nodes = built.graph.node_count();
        self.insert(self.make_index(department, built));
        Ok(nodes)
    }

    /// Rebuild one department off-lock, persist it, then swap it in.
    pub async fn rebuild_department(&self, department: &str, chunks: Vec<DocumentChunk>) -> Result<usize> {
        info!("Rebuilding department '{}' from {} chunks", department, chunks.len());
        self.build_department(department, chunks).await
    }

    /// Read one graph file into an index. Files without communities are
    /// re-partitioned without summaries.
    pub fn load_index(&self, department: &str, path: &Path) -> Result<DepartmentIndex> {
        let file = persist::load(path)?;
        let (mut graph, communities) = file.into_graph()?;
        let partitioner = if communities.is_empty() {
            info!("Graph '{}' has no communities; re-deriving them", department);
            let mut partitioner = self.store.new_partitioner();
            partitioner.partition_without_summaries(&mut graph);
            partitioner
        } else {
            CommunityPartitioner::from_communities(
                self.config.partition.clone(),
                self.store.primary_field(),
                communities,
            )
        };
        Ok(self.make_index(department, BuiltGraph { graph, partitioner }))
    }

    /// Load every `*.graph` file under `base_dir`. A corrupt file only costs
    /// its own department. Returns whether anything was loaded.
    pub fn load_all(&self, base_dir: &Path) -> bool {
        let entries = match std::fs::read_dir(base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read graph directory {}: {}", base_dir.display(), e);
                return false;
            }
        };
        let mut files: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(GRAPH_FILE_EXT))
            .collect();
        files.sort();

        let mut loaded = 0usize;
        for path in files {
            let Some(department) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match self.load_index(&department, &path) {
                Ok(index) => {
                    let stats = index.stats();
                    info!(
                        "Loaded department '{}': {} nodes, {} edges, {} communities",
                        department, stats.node_count, stats.edge_count, stats.communities
                    );
                    self.insert(index);
                    loaded += 1;
                }
                Err(e) => error!("Failed to load department '{}': {}", department, e),
            }
        }
        loaded > 0
    }

    async fn retrieve_from(&self, department: &str, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let index = self
            .get(department)
            .ok_or_else(|| Error::Retrieval(format!("department '{}' is not loaded", department)))?;
        Ok(index
            .retriever
            .retrieve(&index.graph, &index.partitioner, &self.embedder, query, k)
            .await)
    }

    /// Retrieve from the decided department, falling back once to the
    /// fallback department when a specific department yields nothing.
    pub async fn query(&self, query: &str, decision: &DepartmentDecision, k: usize) -> QueryOutcome {
        if !decision.permission_granted {
            return QueryOutcome::empty(QueryStatus::PermissionDenied);
        }
        let chosen = decision.chosen_department.as_str();
        match self.retrieve_from(chosen, query, k).await {
            Ok(chunks) if !chunks.is_empty() => {
                return QueryOutcome {
                    chunks,
                    department: Some(chosen.to_string()),
                    status: QueryStatus::Ok,
                }
            }
            Ok(_) => debug!("No results in '{}'", chosen),
            Err(e) => warn!("{}", e),
        }

        let fallback = self.config.departments.fallback.as_str();
        if chosen != fallback {
            match self.retrieve_from(fallback, query, k).await {
                Ok(chunks) if !chunks.is_empty() => {
                    info!("Fell back from '{}' to '{}'", chosen, fallback);
                    return QueryOutcome {
                        chunks,
                        department: Some(fallback.to_string()),
                        status: QueryStatus::FellBack,
                    };
                }
                Ok(_) => {}
                Err(e) => debug!("Fallback unavailable: {}", e),
            }
        }
        QueryOutcome::empty(QueryStatus::NoResults)
    }

    /// Admin-only search across several departments. Results are tagged
    /// with their department and merged by final score, `k` in total.
    pub async fn query_cross_department(
        &self,
        query: &str,
        departments: &[String],
        k: usize,
        caller: &CallerMetadata,
    ) -> QueryOutcome {
        if !self.permissions.is_admin(caller.role.as_deref()) {
            warn!("Cross-department query refused for role {:?}", caller.role);
            return QueryOutcome::empty(QueryStatus::PermissionDenied);
        }
        let mut merged: Vec<RetrievedChunk> = Vec::new();
        for department in departments {
            match self.retrieve_from(department, query, k).await {
                Ok(chunks) => merged.extend(chunks.into_iter().map(|c| c.tagged(department))),
                Err(e) => warn!("{}", e),
            }
        }
        merged.sort_by(|a, b| {
            b.scores
                .final_score
                .partial_cmp(&a.scores.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(k);
        let status = if merged.is_empty() {
            QueryStatus::NoResults
        } else {
            QueryStatus::Ok
        };
        QueryOutcome {
            chunks: merged,
            department: None,
            status,
        }
    }

    /// Representative embedding of every loaded department.
    pub fn representative_embeddings(&self) -> HashMap<String, Vec<f32>> {
        self.indexes
            .read()
            .iter()
            .filter_map(|(d, index)| index.representative_embedding().map(|e| (d.clone(), e)))
            .collect()
    }
}
