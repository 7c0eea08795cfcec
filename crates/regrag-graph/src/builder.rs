//! Graph construction: nodes, the three edge passes, then partitioning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use regrag_core::{DocumentChunk, EngineConfig, Error, GraphConfig, PartitionConfig, Result};
use regrag_infer::{BatchEmbedder, EmbeddingProvider, GenerationProvider, RetryPolicy};

use crate::community::CommunityPartitioner;
use crate::graph::{EdgeKind, Graph, NodeId};
use crate::semantic::semantic_pairs;

/// Fallback primary field when the taxonomy list is empty.
const DEFAULT_PRIMARY_FIELD: &str = "category";

/// A graph together with its community table.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: Graph,
    pub partitioner: CommunityPartitioner,
}

/// Builds document graphs from chunks.
pub struct GraphStore {
    graph_config: GraphConfig,
    partition_config: PartitionConfig,
    embedder: BatchEmbedder,
    generator: Arc<dyn GenerationProvider>,
    policy: RetryPolicy,
}

impl GraphStore {
    pub fn new(
        graph_config: GraphConfig,
        partition_config: PartitionConfig,
        embedder: BatchEmbedder,
        generator: Arc<dyn GenerationProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            graph_config,
            partition_config,
            embedder,
            generator,
            policy,
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self::new(
            config.graph.clone(),
            config.partition.clone(),
            BatchEmbedder::from_config(embedder, &config.providers),
            generator,
            RetryPolicy::from_config(&config.providers),
        )
    }

    pub fn graph_config(&self) -> &GraphConfig {
        &self.graph_config
    }

    pub fn primary_field(&self) -> &str {
        self.graph_config.primary_field().unwrap_or(DEFAULT_PRIMARY_FIELD)
    }

    /// Empty partitioner configured like the ones `build` produces.
    pub fn new_partitioner(&self) -> CommunityPartitioner {
        CommunityPartitioner::new(self.partition_config.clone(), self.primary_field())
    }

    /// Build a graph with communities from `chunks`, ids in input order.
    ///
    /// Embedding failures leave the affected nodes without an embedding; only
    /// an empty input is an error.
    pub async fn build(&self, chunks: Vec<DocumentChunk>) -> Result<BuiltGraph> {
        if chunks.is_empty() {
            return Err(Error::Build("no chunks to build from".into()));
        }
        let started = Instant::now();
        info!("Building graph from {} chunks", chunks.len());

        let mut graph = Graph::new();
        for chunk in chunks {
            graph.add_chunk(chunk);
        }

        let structural = add_structural_edges(&mut graph);
        let metadata = add_metadata_edges(&mut graph, &self.graph_config);

        let texts: Vec<&str> = graph.nodes().map(|n| n.content.as_str()).collect();
        let embeddings = self.embedder.embed_all(&texts).await;
        let mut missing = 0usize;
        for (id, embedding) in embeddings.into_iter().enumerate() {
            if embedding.is_none() {
                missing += 1;
            }
            graph.set_embedding(id, embedding);
        }
        if missing > 0 {
            warn!("{} of {} chunks have no embedding", missing, graph.node_count());
        }

        let semantic = add_semantic_edges(&mut graph, &self.graph_config);
        debug!(
            "Edges added: {} structural, {} metadata, {} semantic",
            structural, metadata, semantic
        );

        let mut partitioner = self.new_partitioner();
        partitioner
            .partition(&mut graph, self.generator.as_ref(), &self.policy)
            .await;

        let stats = graph.stats();
        info!(
            "Graph built in {:?}: {} nodes, {} edges, {} communities",
            started.elapsed(),
            stats.node_count,
            stats.edge_count,
            stats.communities
        );
        Ok(BuiltGraph { graph, partitioner })
    }
}

/// Link consecutive chunks of the same source file. Chunks without a source
/// get no structural edges.
pub fn add_structural_edges(graph: &mut Graph) -> usize {
    let mut by_source: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    for node in graph.nodes() {
        if let Some(source) = node.meta(regrag_core::chunk::SOURCE_KEY) {
            by_source.entry(source.to_string()).or_default().push(node.id);
        }
    }
    let mut added = 0;
    for ids in by_source.values() {
        for pair in ids.windows(2) {
            if graph.add_edge(pair[0], pair[1], EdgeKind::Structural, 1.0) {
                added += 1;
            }
        }
    }
    added
}

/// For each taxonomy field, link every node to its next `metadata_neighbors`
/// nodes sharing the same value.
pub fn add_metadata_edges(graph: &mut Graph, config: &GraphConfig) -> usize {
    let mut added = 0;
    for (rank, field) in config.taxonomy_fields.iter().enumerate() {
        let weight = if rank == 0 {
            config.primary_field_weight
        } else {
            config.secondary_field_weight
        };
        let mut groups: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in graph.nodes() {
            if let Some(value) = node.meta(field).map(str::trim).filter(|v| !v.is_empty()) {
                groups.entry(value.to_string()).or_default().push(node.id);
            }
        }
        for ids in groups.values() {
            for (i, &a) in ids.iter().enumerate() {
                for &b in ids.iter().skip(i + 1).take(config.metadata_neighbors) {
                    if graph.add_edge(a, b, EdgeKind::Metadata(field.clone()), weight) {
                        added += 1;
                    }
                }
            }
        }
    }
    added
}

/// Connect embedded nodes whose cosine similarity clears the threshold.
pub fn add_semantic_edges(graph: &mut Graph, config: &GraphConfig) -> usize {
    let pairs = {
        let items: Vec<(NodeId, &[f32])> = graph
            .nodes()
            .filter_map(|n| n.embedding.as_deref().map(|e| (n.id, e)))
            .collect();
        semantic_pairs(&items, config)
    };
    let mut added = 0;
    for (a, b, sim) in pairs {
        if graph.add_edge(a, b, EdgeKind::Semantic, sim.max(0.0)) {
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use regrag_core::chunk::SOURCE_KEY;
    use regrag_core::EmbeddingError;
    use regrag_infer::{NoopEmbedder, NoopGenerator};
    use std::time::Duration;

    /// Maps each text onto an axis chosen by its first word.
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0; 3];
            let axis = match text.split_whitespace().next() {
                Some("fee") => 0,
                Some("award") => 1,
                _ => 2,
            };
            v[axis] = 1.0;
            Ok(v)
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn store(embedder: Arc<dyn EmbeddingProvider>) -> GraphStore {
        let policy = RetryPolicy {
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        GraphStore::new(
            GraphConfig::default(),
            PartitionConfig::default(),
            BatchEmbedder::new(embedder, policy.clone(), 5, Duration::ZERO),
            Arc::new(NoopGenerator),
            policy,
        )
    }

    #[tokio::test]
    async fn test_three_chunks_same_source() {
        let chunks = vec![
            DocumentChunk::new("fee one").with(SOURCE_KEY, "a.md"),
            DocumentChunk::new("award two").with(SOURCE_KEY, "a.md"),
            DocumentChunk::new("other three").with(SOURCE_KEY, "a.md"),
        ];
        let built = store(Arc::new(AxisEmbedder)).build(chunks).await.unwrap();
        let stats = built.graph.stats();
        assert_eq!(stats.structural_edges, 2);
        assert_eq!(stats.metadata_edges, 0);
        assert_eq!(stats.semantic_edges, 0);
        assert!(built.graph.edge_between(0, 1).is_some());
        assert!(built.graph.edge_between(1, 2).is_some());
        assert!(built.graph.edge_between(0, 2).is_none());
        assert!(built.partitioner.is_partition_of(&built.graph));
    }

    #[tokio::test]
    async fn test_semantic_edges_above_threshold() {
        let chunks = vec![
            DocumentChunk::new("fee one").with(SOURCE_KEY, "a.md"),
            DocumentChunk::new("fee two").with(SOURCE_KEY, "b.md"),
            DocumentChunk::new("award three").with(SOURCE_KEY, "c.md"),
        ];
        let built = store(Arc::new(AxisEmbedder)).build(chunks).await.unwrap();
        assert_eq!(built.graph.edge_between(0, 1).unwrap().kind, EdgeKind::Semantic);
        assert!(built.graph.edge_between(0, 2).is_none());
    }

    #[test]
    fn test_metadata_edges_bounded_and_not_duplicated() {
        let mut graph = Graph::new();
        for i in 0..5 {
            graph.add_chunk(
                DocumentChunk::new(format!("c{}", i))
                    .with("category", "fee")
                    .with("department", "finance"),
            );
        }
        let added = add_metadata_edges(&mut graph, &GraphConfig::default());
        // 4 + 3 pairs from the category pass; department pass finds them all taken
        assert_eq!(added, 7);
        assert!(graph.edge_between(0, 3).is_none());
        assert_eq!(
            graph.edge_between(0, 1).unwrap().kind,
            EdgeKind::Metadata("category".into())
        );
        assert!((graph.edge_between(0, 2).unwrap().weight - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_build_without_embeddings() {
        let chunks = vec![DocumentChunk::new("x"), DocumentChunk::new("y")];
        let built = store(Arc::new(NoopEmbedder::new(3))).build(chunks).await.unwrap();
        assert_eq!(built.graph.stats().embedded_nodes, 0);
        // no edges at all: each unclassified node ends up alone
        assert_eq!(built.partitioner.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_is_error() {
        assert!(store(Arc::new(AxisEmbedder)).build(Vec::new()).await.is_err());
    }
}
