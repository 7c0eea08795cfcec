//! Metadata-aware community partitioning and query routing.
//!
//! Nodes are first bucketed by their primary taxonomy value, each bucket is
//! clustered on its induced subgraph, and every resulting cluster becomes a
//! globally numbered community with a centroid and a short summary.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use regrag_core::PartitionConfig;
use regrag_infer::{GenerationProvider, RetryPolicy};

use crate::graph::{CommunityId, Graph, NodeId};
use crate::louvain::{self, Adjacency};
use crate::vector::{cosine, weighted_mean};

/// Bucket for nodes with no primary taxonomy value.
pub const UNCLASSIFIED: &str = "_unclassified";

/// Metadata key collected into [`Community::categories`].
pub const CATEGORY_KEY: &str = "category";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub member_ids: BTreeSet<NodeId>,
    /// Empty when no important member carries an embedding.
    pub centroid: Vec<f32>,
    pub summary: String,
    pub categories: BTreeSet<String>,
}

impl Community {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// Owns the community table of one graph.
#[derive(Debug, Clone)]
pub struct CommunityPartitioner {
    config: PartitionConfig,
    primary_field: String,
    communities: BTreeMap<CommunityId, Community>,
}

impl CommunityPartitioner {
    pub fn new(config: PartitionConfig, primary_field: impl Into<String>) -> Self {
        Self {
            config,
            primary_field: primary_field.into(),
            communities: BTreeMap::new(),
        }
    }

    /// Restore a persisted community table.
    pub fn from_communities(
        config: PartitionConfig,
        primary_field: impl Into<String>,
        communities: Vec<Community>,
    ) -> Self {
        Self {
            config,
            primary_field: primary_field.into(),
            communities: communities.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn communities(&self) -> impl Iterator<Item = &Community> {
        self.communities.values()
    }

    pub fn community(&self, id: CommunityId) -> Option<&Community> {
        self.communities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.communities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    /// Full partition: clustering, centroids, then summaries from `generator`.
    pub async fn partition(
        &mut self,
        graph: &mut Graph,
        generator: &dyn GenerationProvider,
        policy: &RetryPolicy,
    ) {
        self.partition_structure(graph);
        self.compute_centroids(graph);
        self.summarize(graph, generator, policy).await;
    }

    /// Clustering and centroids only; summaries are left empty.
    pub fn partition_without_summaries(&mut self, graph: &mut Graph) {
        self.partition_structure(graph);
        self.compute_centroids(graph);
    }

    /// Steps 1-3: bucket, cluster each bucket, write community ids back.
    pub fn partition_structure(&mut self, graph: &mut Graph) {
        let mut buckets: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in graph.nodes() {
            let key = node
                .meta(&self.primary_field)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(UNCLASSIFIED);
            buckets.entry(key.to_string()).or_default().push(node.id);
        }

        let mut communities = BTreeMap::new();
        let mut next_id: CommunityId = 0;
        for (key, members) in &buckets {
            let groups: Vec<Vec<NodeId>> = if members.len() == 1 {
                vec![members.clone()]
            } else {
                let labels = louvain::detect(
                    &induced_adjacency(graph, members),
                    self.config.max_louvain_passes,
                );
                let count = labels.iter().copied().max().map_or(0, |m| m + 1);
                let mut groups = vec![Vec::new(); count];
                for (local, label) in labels.into_iter().enumerate() {
                    groups[label].push(members[local]);
                }
                groups
            };
            debug!("Bucket '{}': {} nodes -> {} communities", key, members.len(), groups.len());

            for group in groups {
                let id = next_id;
                next_id += 1;
                let mut categories = BTreeSet::new();
                for &node_id in &group {
                    graph.set_community(node_id, id);
                    if let Some(c) = graph.node(node_id).and_then(|n| n.meta(CATEGORY_KEY)) {
                        categories.insert(c.to_string());
                    }
                }
                communities.insert(
                    id,
                    Community {
                        id,
                        member_ids: group.into_iter().collect(),
                        centroid: Vec::new(),
                        summary: String::new(),
                        categories,
                    },
                );
            }
        }

        info!(
            "Partitioned {} nodes into {} communities ({} buckets)",
            graph.node_count(),
            communities.len(),
            buckets.len()
        );
        self.communities = communities;
    }

    /// Importance used to pick a community's representative nodes.
    pub fn importance(&self, graph: &Graph, id: NodeId) -> f32 {
        let Some(node) = graph.node(id) else {
            return 0.0;
        };
        let content = node.content.to_lowercase();
        let hits = self
            .config
            .keyword_bonus_terms
            .iter()
            .filter(|term| content.contains(&term.to_lowercase()))
            .count();
        node.content.chars().count() as f32
            + 10.0 * graph.degree(id) as f32
            + self.config.keyword_bonus * hits as f32
    }

    /// Top `top_nodes` members by importance, ties by id.
    pub fn important_nodes(&self, graph: &Graph, community: &Community) -> Vec<NodeId> {
        let mut ranked: Vec<(NodeId, f32)> = community
            .member_ids
            .iter()
            .map(|&id| (id, self.importance(graph, id)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(self.config.top_nodes.max(1));
        ranked.into_iter().map(|(id, _)| id).collect()
    }

    /// Degree-and-length weighted mean of the important nodes' embeddings.
    pub fn compute_centroids(&mut self, graph: &Graph) {
        let mut centroids = HashMap::new();
        for community in self.communities.values() {
            let top = self.important_nodes(graph, community);
            let weighted = top.iter().filter_map(|&id| {
                let node = graph.node(id)?;
                let embedding = node.embedding.as_deref()?;
                let len = node.content.chars().count() as f32;
                let weight = (1.0 + graph.degree(id) as f32) * (1.0 + (1.0 + len).ln());
                Some((embedding, weight))
            });
            centroids.insert(community.id, weighted_mean(weighted).unwrap_or_default());
        }
        for (id, centroid) in centroids {
            if let Some(c) = self.communities.get_mut(&id) {
                c.centroid = centroid;
            }
        }
    }

    /// Truncated concatenation of the top-3 node contents.
    pub fn fallback_summary(&self, graph: &Graph, community: &Community) -> String {
        self.important_nodes(graph, community)
            .into_iter()
            .take(3)
            .filter_map(|id| graph.node(id))
            .map(|n| truncate_chars(n.content.trim(), self.config.fallback_snippet_chars))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Step 4: ask `generator` for one summary per community, with bounded
    /// concurrency. A failed summary falls back to [`Self::fallback_summary`].
    pub async fn summarize(
        &mut self,
        graph: &Graph,
        generator: &dyn GenerationProvider,
        policy: &RetryPolicy,
    ) {
        let jobs: Vec<(CommunityId, Vec<String>, String)> = self
            .communities
            .values()
            .map(|c| {
                let snippets = self
                    .important_nodes(graph, c)
                    .into_iter()
                    .filter_map(|id| graph.node(id).map(|n| n.content.clone()))
                    .collect();
                (c.id, snippets, self.fallback_summary(graph, c))
            })
            .collect();

        if !generator.is_available() {
            info!("No generator available; using fallback summaries for {} communities", jobs.len());
            for (id, _, fallback) in jobs {
                if let Some(c) = self.communities.get_mut(&id) {
                    c.summary = fallback;
                }
            }
            return;
        }

        let results: Vec<(CommunityId, String)> = stream::iter(jobs)
            .map(|(id, snippets, fallback)| async move {
                let refs: Vec<&str> = snippets.iter().map(String::as_str).collect();
                match policy.run("summarize", || generator.summarize(&refs)).await {
                    Ok(summary) if !summary.trim().is_empty() => (id, summary.trim().to_string()),
                    Ok(_) => (id, fallback),
                    Err(e) => {
                        warn!("Summary for community {} failed ({}); using fallback", id, e);
                        (id, fallback)
                    }
                }
            })
            .buffer_unordered(self.config.summary_concurrency.max(1))
            .collect()
            .await;

        for (id, summary) in results {
            if let Some(c) = self.communities.get_mut(&id) {
                c.summary = summary;
            }
        }
    }

    /// Routing score of one community for a query embedding.
    pub fn route_score(&self, community: &Community, query_embedding: &[f32]) -> f32 {
        let size_boost = (community.len() as f32 / 1000.0).min(0.05);
        let diversity_boost = if community.categories.len() > 1 { 0.02 } else { 0.0 };
        0.90 * cosine(query_embedding, &community.centroid) + 0.05 * size_boost + 0.05 * diversity_boost
    }

    /// Rank communities for a query with confidence-adaptive breadth.
    ///
    /// Best score above 0.5 returns up to `top_k`; in (0.3, 0.5] up to
    /// `top_k + 2` capped at 7; at or below 0.3 every community. The first
    /// two tiers drop scores under `min_similarity` but never return empty.
    pub fn route(&self, query_embedding: &[f32], top_k: usize, min_similarity: f32) -> Vec<(CommunityId, f32)> {
        let mut scored: Vec<(CommunityId, f32)> = self
            .communities
            .values()
            .map(|c| (c.id, self.route_score(c, query_embedding)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        let Some(&best) = scored.first() else {
            return Vec::new();
        };

        let limit = if best.1 > 0.5 {
            top_k
        } else if best.1 > 0.3 {
            (top_k + 2).min(7).max(top_k)
        } else {
            debug!("Low routing confidence ({:.3}); searching all {} communities", best.1, scored.len());
            return scored;
        };

        let mut routed: Vec<(CommunityId, f32)> = scored
            .into_iter()
            .take(limit)
            .filter(|(_, s)| *s >= min_similarity)
            .collect();
        if routed.is_empty() {
            routed.push(best);
        }
        debug!("Routed to {} communities (best {:.3})", routed.len(), best.1);
        routed
    }

    /// True when communities are disjoint, cover every node and agree with
    /// the ids written on the nodes.
    pub fn is_partition_of(&self, graph: &Graph) -> bool {
        let mut seen = BTreeSet::new();
        for community in self.communities.values() {
            for &id in &community.member_ids {
                if !seen.insert(id) {
                    return false;
                }
                if graph.node(id).and_then(|n| n.community_id) != Some(community.id) {
                    return false;
                }
            }
        }
        seen.len() == graph.node_count()
    }
}

fn induced_adjacency(graph: &Graph, members: &[NodeId]) -> Adjacency {
    let local: HashMap<NodeId, usize> = members.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    members
        .iter()
        .map(|&id| {
            graph
                .neighbors(id)
                .filter_map(|(other, edge)| local.get(&other).map(|&j| (j, edge.weight as f64)))
                .collect()
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
