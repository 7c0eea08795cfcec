//! Graph-routed hybrid retriever.
//!
//! Stages:
//! A. embed the query (cached) and route it to communities
//! B. seed nodes per community, one-hop and bounded two-hop expansion
//! C. BM25 over the whole graph
//! D. rank fusion of the semantic and lexical lists
//! E. fine rerank of the expanded neighbourhood of every routed community;
//!    its order replaces cosine order in the semantic list D fuses
//! F. MMR diversity over the fused scores

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use regrag_core::RetrievalConfig;
use regrag_graph::vector::cosine;
use regrag_graph::{CommunityPartitioner, EdgeKind, Graph, NodeId};
use regrag_infer::{BatchEmbedder, QueryCache};

use crate::bm25::Bm25Index;
use crate::diversity::{mmr_select, MmrParams};
use crate::pagerank::{page_rank, PageRankConfig};
use crate::text::is_numeric_query;
use crate::types::{RetrievedChunk, ScoreBreakdown};

/// Proximity credit passed from a seed to a neighbour, by edge kind.
fn proximity_decay(kind: &EdgeKind) -> f32 {
    match kind {
        EdgeKind::Structural => 1.0,
        EdgeKind::Semantic => 0.7,
        EdgeKind::Metadata(_) => 0.4,
    }
}

/// Per-query candidate with the signals gathered so far.
#[derive(Debug, Default, Clone)]
struct Candidate {
    semantic: Option<f32>,
    semantic_rank: Option<usize>,
    bm25: f32,
    lexical_rank: Option<usize>,
}

/// Retriever bound to one graph. Holds the query-embedding cache and the
/// lazily built BM25 index and PageRank vector for that graph.
pub struct HybridRetriever {
    config: RetrievalConfig,
    taxonomy_fields: Vec<String>,
    cache: QueryCache,
    bm25: OnceCell<Bm25Index>,
    pagerank: OnceCell<Vec<f64>>,
}

impl HybridRetriever {
    pub fn new(config: RetrievalConfig, taxonomy_fields: Vec<String>) -> Self {
        let cache = QueryCache::new(config.query_cache_size, config.query_cache_ttl());
        Self {
            config,
            taxonomy_fields,
            cache,
            bm25: OnceCell::new(),
            pagerank: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn bm25(&self, graph: &Graph) -> &Bm25Index {
        self.bm25
            .get_or_init(|| Bm25Index::build(graph, self.config.bm25_k1, self.config.bm25_b))
    }

    fn pagerank(&self, graph: &Graph) -> &[f64] {
        self.pagerank
            .get_or_init(|| page_rank(graph, &PageRankConfig::default()))
    }

    /// Query embedding from the cache, or from `embedder` on a miss.
    /// Embedding failures degrade to lexical-only retrieval.
    pub async fn query_embedding(&self, embedder: &BatchEmbedder, query: &str) -> Option<Arc<Vec<f32>>> {
        if let Some(hit) = self.cache.get(query) {
            return Some(hit);
        }
        if !embedder.is_available() {
            return None;
        }
        match embedder.embed_one(query).await {
            Ok(vector) => {
                let vector = Arc::new(vector);
                self.cache.put(query.to_string(), Arc::clone(&vector));
                Some(vector)
            }
            Err(e) => {
                warn!("Query embedding failed ({}); using lexical retrieval only", e);
                None
            }
        }
    }

    /// Retrieve up to `k` chunks for `query`.
    pub async fn retrieve(
        &self,
        graph: &Graph,
        partitioner: &CommunityPartitioner,
        embedder: &BatchEmbedder,
        query: &str,
        k: usize,
    ) -> Vec<RetrievedChunk> {
        let embedding = self.query_embedding(embedder, query).await;
        self.retrieve_with_embedding(graph, partitioner, query, embedding.as_deref().map(Vec::as_slice), k)
    }

    /// Synchronous core of [`Self::retrieve`] for a known query embedding.
    pub fn retrieve_with_embedding(
        &self,
        graph: &Graph,
        partitioner: &CommunityPartitioner,
        query: &str,
        query_embedding: Option<&[f32]>,
        k: usize,
    ) -> Vec<RetrievedChunk> {
        if graph.is_empty() || k == 0 {
            return Vec::new();
        }

        // Stage A
        let routed = match query_embedding {
            Some(q) => partitioner.route(q, self.config.route_top_k, self.config.route_min_similarity),
            None => Vec::new(),
        };

        let mut candidates: BTreeMap<NodeId, Candidate> = BTreeMap::new();
        let mut seed_scores: HashMap<NodeId, f32> = HashMap::new();

        // Stage B
        if let Some(q) = query_embedding {
            let expanded = self.expand(graph, partitioner, &routed, q, &mut seed_scores);
            let mut semantic: Vec<(NodeId, f32)> = expanded
                .into_iter()
                .filter_map(|id| graph.embedding(id).map(|e| (id, cosine(q, e))))
                .collect();
            sort_desc(&mut semantic);
            for (rank, (id, sim)) in semantic.into_iter().enumerate() {
                let c = candidates.entry(id).or_default();
                c.semantic = Some(sim);
                c.semantic_rank = Some(rank);
            }
        }
        let semantic_len = candidates.len();

        // Stage C
        let lexical = self.bm25(graph).search(query, self.config.bm25_top_n);
        let lexical_len = lexical.len();
        for (rank, (id, score)) in lexical.into_iter().enumerate() {
            let c = candidates.entry(id).or_default();
            c.bm25 = score;
            c.lexical_rank = Some(rank);
        }
        if candidates.is_empty() {
            debug!("No candidates for query");
            return Vec::new();
        }

        let numeric = is_numeric_query(query);
        let max_bm25 = candidates.values().map(|c| c.bm25).fold(0.0f32, f32::max);
        let pagerank = self.pagerank(graph);

        let mut breakdowns: BTreeMap<NodeId, ScoreBreakdown> = BTreeMap::new();
        for (&id, c) in &candidates {
            breakdowns.insert(
                id,
                ScoreBreakdown {
                    semantic: c.semantic.unwrap_or(0.0),
                    bm25: c.bm25,
                    pagerank: pagerank.get(id).copied().unwrap_or(0.0) as f32,
                    metadata_match: self.metadata_match(graph, id, query),
                    structural: structural_proximity(graph, id, &seed_scores),
                    fused: 0.0,
                    final_score: 0.0,
                },
            );
        }

        // Stage E: the merged neighbourhood of all routed communities is
        // ordered by the fine score instead of raw cosine before fusion.
        let mut fine: Vec<(NodeId, f32)> = candidates
            .iter()
            .filter(|(_, c)| c.semantic_rank.is_some())
            .filter_map(|(&id, _)| {
                let scores = breakdowns.get(&id)?;
                let table = graph.node(id).map(|n| n.is_table()).unwrap_or(false);
                Some((id, self.rerank_score(scores, max_bm25, table && numeric)))
            })
            .collect();
        sort_desc(&mut fine);
        for (rank, (id, _)) in fine.into_iter().enumerate() {
            if let Some(c) = candidates.get_mut(&id) {
                c.semantic_rank = Some(rank);
            }
        }

        // Stage D
        for (&id, c) in &candidates {
            let is_table = graph.node(id).map(|n| n.is_table()).unwrap_or(false);
            if let Some(scores) = breakdowns.get_mut(&id) {
                scores.fused = self.fused_score(c, semantic_len, lexical_len, is_table);
            }
        }

        // Stage F
        let ranked: Vec<(NodeId, f32)> = breakdowns.iter().map(|(&id, s)| (id, s.fused)).collect();
        let params = MmrParams {
            k,
            lambda: self.config.mmr_lambda,
            structural_penalty_factor: self.config.structural_penalty_factor,
        };
        let selected = mmr_select(&ranked, graph, params);
        debug!(
            "Retrieved {} of {} candidates ({} routed communities, {} lexical hits)",
            selected.len(),
            ranked.len(),
            routed.len(),
            lexical_len
        );

        selected
            .into_iter()
            .filter_map(|(id, value)| {
                let node = graph.node(id)?;
                let mut scores = breakdowns.remove(&id)?;
                scores.final_score = value;
                Some(RetrievedChunk {
                    node_id: id,
                    content: node.content.clone(),
                    metadata: node.metadata.clone(),
                    department: None,
                    scores,
                })
            })
            .collect()
    }

    /// Seeds plus one-hop neighbours plus a capped two-hop ring.
    fn expand(
        &self,
        graph: &Graph,
        partitioner: &CommunityPartitioner,
        routed: &[(regrag_graph::CommunityId, f32)],
        query: &[f32],
        seed_scores: &mut HashMap<NodeId, f32>,
    ) -> BTreeSet<NodeId> {
        let mut expanded = BTreeSet::new();
        for (community_id, _) in routed {
            let Some(community) = partitioner.community(*community_id) else {
                continue;
            };
            let mut members: Vec<(NodeId, f32)> = community
                .member_ids
                .iter()
                .filter_map(|&id| graph.embedding(id).map(|e| (id, cosine(query, e))))
                .collect();
            sort_desc(&mut members);
            members.truncate(self.config.seeds_per_community);
            for (id, sim) in members {
                seed_scores.insert(id, sim);
                expanded.insert(id);
            }
        }

        let mut one_hop: Vec<NodeId> = Vec::new();
        for &seed in seed_scores.keys() {
            for (neighbor, _) in graph.neighbors(seed) {
                if expanded.insert(neighbor) {
                    one_hop.push(neighbor);
                }
            }
        }
        one_hop.sort();

        let mut ranked_one_hop: Vec<(NodeId, f32)> = one_hop
            .into_iter()
            .map(|id| (id, graph.embedding(id).map(|e| cosine(query, e)).unwrap_or(0.0)))
            .collect();
        sort_desc(&mut ranked_one_hop);

        let mut added = 0;
        'outer: for (source, _) in ranked_one_hop.into_iter().take(self.config.two_hop_sources) {
            for (neighbor, _) in graph.neighbors(source) {
                if added >= self.config.two_hop_cap {
                    break 'outer;
                }
                if expanded.insert(neighbor) {
                    added += 1;
                }
            }
        }
        expanded
    }

    /// Stage D score: weighted rank scores, agreement bonus, table multiplier.
    fn fused_score(&self, c: &Candidate, semantic_len: usize, lexical_len: usize, is_table: bool) -> f32 {
        let rank_score = |rank: Option<usize>, len: usize| match rank {
            Some(r) if len > 0 => 1000.0 * (1.0 - r as f32 / len as f32),
            _ => 0.0,
        };
        let mut score = self.config.semantic_rank_weight * rank_score(c.semantic_rank, semantic_len)
            + self.config.lexical_rank_weight * rank_score(c.lexical_rank, lexical_len);
        if c.semantic_rank.is_some() && c.lexical_rank.is_some() {
            score += self.config.agreement_bonus;
        }
        if is_table {
            score *= self.config.table_multiplier;
        }
        score
    }

    /// Stage E score over signals scaled to [0, 1].
    fn rerank_score(&self, s: &ScoreBreakdown, max_bm25: f32, table_boost: bool) -> f32 {
        let bm25 = if max_bm25 > 0.0 { s.bm25 / max_bm25 } else { 0.0 };
        let mut score = self.config.rerank_semantic * s.semantic.max(0.0)
            + self.config.rerank_bm25 * bm25
            + self.config.rerank_pagerank * s.pagerank
            + self.config.rerank_metadata * s.metadata_match
            + self.config.rerank_structural * s.structural;
        if table_boost {
            score += self.config.table_bonus;
        }
        score
    }

    /// Share of the node's taxonomy values mentioned in the query.
    fn metadata_match(&self, graph: &Graph, id: NodeId, query: &str) -> f32 {
        let Some(node) = graph.node(id) else {
            return 0.0;
        };
        let values: Vec<String> = self
            .taxonomy_fields
            .iter()
            .filter_map(|f| node.meta(f))
            .map(|v| v.trim().to_lowercase().replace('_', " "))
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return 0.0;
        }
        let query = query.to_lowercase();
        values.iter().filter(|v| query.contains(v.as_str())).count() as f32 / values.len() as f32
    }
}

/// Best seed score reachable over one edge, decayed by edge kind. Seeds
/// themselves count with their own score.
fn structural_proximity(graph: &Graph, id: NodeId, seeds: &HashMap<NodeId, f32>) -> f32 {
    let own = seeds.get(&id).copied().unwrap_or(0.0);
    graph
        .neighbors(id)
        .filter_map(|(n, edge)| seeds.get(&n).map(|s| s * proximity_decay(&edge.kind)))
        .fold(own, f32::max)
        .clamp(0.0, 1.0)
}

fn sort_desc(items: &mut [(NodeId, f32)]) {
    items.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use regrag_core::chunk::{SOURCE_KEY, TABLE_KEY};
    use regrag_core::{DocumentChunk, PartitionConfig};

    /// Two topical clusters plus one lexical-only table chunk.
    fn fixture() -> (Graph, CommunityPartitioner) {
        let mut graph = Graph::new();
        let rows = [
            ("học phí ngành kỹ thuật", "fee", "a.md", Some([1.0, 0.0, 0.0])),
            ("học phí ngành kinh tế", "fee", "a.md", Some([0.95, 0.05, 0.0])),
            ("miễn giảm học phí", "fee", "a.md", Some([0.9, 0.1, 0.0])),
            ("khen thưởng sinh viên", "award", "b.md", Some([0.0, 1.0, 0.0])),
            ("kỷ luật sinh viên", "award", "b.md", Some([0.0, 0.9, 0.1])),
            ("bảng mã ngành 7480201", "code", "c.md", None),
        ];
        for (text, category, source, embedding) in rows {
            let id = graph.add_chunk(
                DocumentChunk::new(text)
                    .with("category", category)
                    .with(SOURCE_KEY, source),
            );
            graph.set_embedding(id, embedding.map(|e| e.to_vec()));
        }
        graph.add_edge(0, 1, EdgeKind::Structural, 1.0);
        graph.add_edge(1, 2, EdgeKind::Structural, 1.0);
        graph.add_edge(3, 4, EdgeKind::Structural, 1.0);
        let mut partitioner = CommunityPartitioner::new(PartitionConfig::default(), "category");
        partitioner.partition_without_summaries(&mut graph);
        (graph, partitioner)
    }

    fn retriever() -> HybridRetriever {
        HybridRetriever::new(RetrievalConfig::default(), vec!["category".into()])
    }

    #[test]
    fn test_semantic_query_prefers_routed_cluster() {
        let (graph, partitioner) = fixture();
        let hits = retriever().retrieve_with_embedding(&graph, &partitioner, "học phí", Some(&[1.0, 0.0, 0.0]), 3);
        let ids: BTreeSet<NodeId> = hits.iter().map(|h| h.node_id).collect();
        assert_eq!(ids, [0, 1, 2].into_iter().collect());
        assert!(hits.iter().all(|h| h.scores.final_score > 0.0));
        assert!(hits.windows(2).all(|w| w[0].scores.final_score >= w[1].scores.final_score));
    }

    #[test]
    fn test_lexical_only_node_recovered() {
        let (graph, partitioner) = fixture();
        let hits = retriever().retrieve_with_embedding(&graph, &partitioner, "mã 7480201", Some(&[1.0, 0.0, 0.0]), 4);
        assert!(hits.iter().any(|h| h.node_id == 5));
        let table = hits.iter().find(|h| h.node_id == 5).unwrap();
        assert_eq!(table.scores.semantic, 0.0);
        assert!(table.scores.bm25 > 0.0);
    }

    #[test]
    fn test_without_embedding_falls_back_to_bm25() {
        let (graph, partitioner) = fixture();
        let hits = retriever().retrieve_with_embedding(&graph, &partitioner, "kỷ luật", None, 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, 4);
    }

    #[test]
    fn test_empty_graph_and_zero_k() {
        let partitioner = CommunityPartitioner::new(PartitionConfig::default(), "category");
        let r = retriever();
        assert!(r.retrieve_with_embedding(&Graph::new(), &partitioner, "x", None, 5).is_empty());
        let (graph, partitioner) = fixture();
        assert!(r.retrieve_with_embedding(&graph, &partitioner, "học phí", Some(&[1.0, 0.0, 0.0]), 0).is_empty());
    }

    #[test]
    fn test_structural_proximity_decay() {
        let (graph, _) = fixture();
        let seeds: HashMap<NodeId, f32> = [(0, 0.8)].into_iter().collect();
        assert!((structural_proximity(&graph, 1, &seeds) - 0.8).abs() < 1e-6);
        assert_eq!(structural_proximity(&graph, 2, &seeds), 0.0);
        assert!((structural_proximity(&graph, 0, &seeds) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_metadata_match_fraction() {
        let (graph, _) = fixture();
        let r = retriever();
        assert_eq!(r.metadata_match(&graph, 0, "fee schedule"), 1.0);
        assert_eq!(r.metadata_match(&graph, 3, "fee schedule"), 0.0);
    }

    /// Three singleton communities all routed for `[1, 0, 0, 0]`; the table
    /// chunk is the least similar of them.
    fn spread_fixture() -> (Graph, CommunityPartitioner) {
        let mut graph = Graph::new();
        let rows = [
            ("quy định chung về học vụ", "a", false, [0.6, 0.8, 0.0, 0.0]),
            ("hướng dẫn đăng ký môn học", "b", false, [0.55, 0.0, 0.835, 0.0]),
            ("bảng mức thu theo ngành", "c", true, [0.4, 0.0, 0.0, 0.9165]),
        ];
        for (text, category, table, embedding) in rows {
            let mut chunk = DocumentChunk::new(text).with("category", category);
            if table {
                chunk = chunk.with(TABLE_KEY, "true");
            }
            let id = graph.add_chunk(chunk);
            graph.set_embedding(id, Some(embedding.to_vec()));
        }
        let mut partitioner = CommunityPartitioner::new(PartitionConfig::default(), "category");
        partitioner.partition_without_summaries(&mut graph);
        (graph, partitioner)
    }

    #[test]
    fn test_numeric_query_lifts_table_across_routed_communities() {
        let (graph, partitioner) = spread_fixture();
        let q = [1.0, 0.0, 0.0, 0.0];
        let r = retriever();
        assert_eq!(partitioner.route(&q, r.config().route_top_k, r.config().route_min_similarity).len(), 3);

        let hits = r.retrieve_with_embedding(&graph, &partitioner, "xyz 2024", Some(&q[..]), 3);
        let order: Vec<NodeId> = hits.iter().map(|h| h.node_id).collect();
        assert_eq!(order, vec![2, 0, 1]);
        // first of three semantic ranks, times the table multiplier
        assert!((hits[0].scores.fused - 850.0 * 1.1).abs() < 1e-2);
        assert!(hits.windows(2).all(|w| w[0].scores.final_score >= w[1].scores.final_score));

        let plain = r.retrieve_with_embedding(&graph, &partitioner, "xyz", Some(&q[..]), 3);
        let order: Vec<NodeId> = plain.iter().map(|h| h.node_id).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_rerank_table_bonus_is_exact() {
        let r = retriever();
        let scores = ScoreBreakdown {
            semantic: 1.0,
            bm25: 2.0,
            pagerank: 0.5,
            metadata_match: 1.0,
            structural: 0.5,
            ..Default::default()
        };
        // 0.2 * 1 + 0.3 * 0.5 + 0.1 * 0.5 + 0.1 * 1 + 0.3 * 0.5
        let base = r.rerank_score(&scores, 4.0, false);
        assert!((base - 0.65).abs() < 1e-6);
        assert!((r.rerank_score(&scores, 4.0, true) - 1.05).abs() < 1e-6);
        assert!((r.rerank_score(&ScoreBreakdown::default(), 0.0, true) - 0.4).abs() < 1e-6);
    }

    /// One seed, thirty one-hop neighbours ranked by falling cosine, and three
    /// private two-hop leaves behind each neighbour.
    fn fan_out_graph() -> (Graph, CommunityPartitioner) {
        let mut graph = Graph::new();
        let seed = graph.add_chunk(DocumentChunk::new("gốc").with("category", "a"));
        graph.set_embedding(seed, Some(vec![1.0, 0.0]));
        for i in 1..=30 {
            let id = graph.add_chunk(DocumentChunk::new(format!("láng giềng {}", i)).with("category", "b"));
            graph.set_embedding(id, Some(vec![1.0, i as f32 * 0.01]));
            graph.add_edge(seed, id, EdgeKind::Structural, 1.0);
        }
        for source in 1..=30 {
            for _ in 0..3 {
                let leaf = graph.add_chunk(DocumentChunk::new("lá").with("category", "c"));
                graph.add_edge(source, leaf, EdgeKind::Structural, 1.0);
            }
        }
        let mut partitioner = CommunityPartitioner::new(PartitionConfig::default(), "category");
        partitioner.partition_without_summaries(&mut graph);
        (graph, partitioner)
    }

    /// Leaves hanging off one-hop node `source`.
    fn leaves_of(source: NodeId) -> std::ops::Range<NodeId> {
        let first = 31 + (source - 1) * 3;
        first..first + 3
    }

    #[test]
    fn test_two_hop_expansion_limits() {
        let (graph, partitioner) = fan_out_graph();
        let seed_community = graph.node(0).unwrap().community_id.unwrap();
        let routed = vec![(seed_community, 1.0)];
        let q = [1.0, 0.0];

        let mut seeds = HashMap::new();
        let expanded = retriever().expand(&graph, &partitioner, &routed, &q, &mut seeds);
        assert_eq!(seeds.keys().copied().collect::<Vec<_>>(), vec![0]);
        // seed, every one-hop neighbour, then exactly 50 two-hop leaves
        assert_eq!(expanded.len(), 1 + 30 + 50);
        assert!((1..=16).flat_map(leaves_of).all(|id| expanded.contains(&id)));
        assert_eq!(leaves_of(17).filter(|id| expanded.contains(id)).count(), 2);
        assert!((18..=30).flat_map(leaves_of).all(|id| !expanded.contains(&id)));

        let mut config = RetrievalConfig::default();
        config.two_hop_cap = 1000;
        let wide = HybridRetriever::new(config, vec!["category".into()]);
        let expanded = wide.expand(&graph, &partitioner, &routed, &q, &mut HashMap::new());
        // only the 20 most similar one-hop nodes are expanded
        assert_eq!(expanded.len(), 1 + 30 + 60);
        assert!((1..=20).flat_map(leaves_of).all(|id| expanded.contains(&id)));
        assert!((21..=30).flat_map(leaves_of).all(|id| !expanded.contains(&id)));
    }

    #[test]
    fn test_fusion_bonus_and_table_multiplier() {
        let r = retriever();
        let both = Candidate {
            semantic: Some(0.9),
            semantic_rank: Some(0),
            bm25: 1.0,
            lexical_rank: Some(0),
        };
        let plain = r.fused_score(&both, 2, 2, false);
        assert!((plain - (850.0 + 150.0 + 120.0)).abs() < 1e-3);
        assert!((r.fused_score(&both, 2, 2, true) - plain * 1.1).abs() < 1e-2);
    }
}
