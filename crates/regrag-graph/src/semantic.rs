//! Semantic edge discovery over node embeddings.
//!
//! Below `ann_min_nodes` the exact cosine matrix is computed with ndarray;
//! above it an HNSW index (instant-distance) answers the neighbour queries.
//! Both paths apply the same top-k and threshold rule. The index is never
//! persisted; it is rebuilt from stored embeddings when needed.

use instant_distance::{Builder, HnswMap, Search};
use ndarray::{Array2, ArrayView1};
use tracing::debug;

use regrag_core::GraphConfig;

use crate::graph::NodeId;
use crate::vector::{dot, normalized};

/// An L2-normalized embedding; distance is `1 - cosine`.
#[derive(Clone, Debug)]
struct EmbeddingPoint(Vec<f32>);

impl instant_distance::Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        1.0 - dot(&self.0, &other.0)
    }
}

/// A candidate semantic edge `(a, b, cosine)`.
pub type SemanticPair = (NodeId, NodeId, f32);

/// Find, for every embedded node, up to `max_edges_per_node` neighbours with
/// cosine similarity at or above `semantic_threshold`.
pub fn semantic_pairs(items: &[(NodeId, &[f32])], config: &GraphConfig) -> Vec<SemanticPair> {
    let Some(dim) = items.first().map(|(_, v)| v.len()) else {
        return Vec::new();
    };
    let usable: Vec<(NodeId, Vec<f32>)> = items
        .iter()
        .filter(|(_, v)| v.len() == dim && dim > 0)
        .map(|(id, v)| (*id, normalized(v)))
        .collect();
    if usable.len() < 2 || config.max_edges_per_node == 0 {
        return Vec::new();
    }

    if usable.len() >= config.ann_min_nodes {
        debug!("Semantic edges via HNSW over {} nodes", usable.len());
        ann_pairs(usable, config)
    } else {
        debug!("Semantic edges via exact cosine over {} nodes", usable.len());
        exact_pairs(&usable, dim, config)
    }
}

fn exact_pairs(usable: &[(NodeId, Vec<f32>)], dim: usize, config: &GraphConfig) -> Vec<SemanticPair> {
    let n = usable.len();
    let mut matrix = Array2::<f32>::zeros((n, dim));
    for (i, (_, v)) in usable.iter().enumerate() {
        matrix.row_mut(i).assign(&ArrayView1::from(v.as_slice()));
    }
    let sims = matrix.dot(&matrix.t());

    let mut pairs = Vec::new();
    for i in 0..n {
        let mut row: Vec<(usize, f32)> = sims
            .row(i)
            .iter()
            .enumerate()
            .map(|(j, &s)| (j, s))
            .collect();
        row.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        row.truncate(config.max_edges_per_node + 1);
        for (j, sim) in row {
            if j != i && sim >= config.semantic_threshold {
                pairs.push((usable[i].0, usable[j].0, sim.min(1.0)));
            }
        }
    }
    pairs
}

fn ann_pairs(usable: Vec<(NodeId, Vec<f32>)>, config: &GraphConfig) -> Vec<SemanticPair> {
    let (ids, vectors): (Vec<NodeId>, Vec<Vec<f32>>) = usable.into_iter().unzip();
    let points: Vec<EmbeddingPoint> = vectors.into_iter().map(EmbeddingPoint).collect();

    let index: HnswMap<EmbeddingPoint, NodeId> = Builder::default()
        .ef_construction(config.ann_ef_construction)
        .ef_search(config.ann_ef_search)
        .seed(42)
        .build(points.clone(), ids.clone());

    let mut search = Search::default();
    let mut pairs = Vec::new();
    for (point, &id) in points.iter().zip(&ids) {
        for item in index.search(point, &mut search).take(config.max_edges_per_node + 1) {
            let other = *item.value;
            let sim = 1.0 - item.distance;
            if other != id && sim >= config.semantic_threshold {
                pairs.push((id, other, sim.min(1.0)));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f32, k: usize, ann_min_nodes: usize) -> GraphConfig {
        GraphConfig {
            semantic_threshold: threshold,
            max_edges_per_node: k,
            ann_min_nodes,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_threshold() {
        let a = [1.0, 0.0];
        let b = [0.9, 0.1];
        let c = [0.0, 1.0];
        let items: Vec<(NodeId, &[f32])> = vec![(0, &a[..]), (1, &b[..]), (2, &c[..])];
        let pairs = semantic_pairs(&items, &config(0.6, 5, 100));
        assert!(pairs.iter().any(|&(x, y, _)| (x, y) == (0, 1)));
        assert!(pairs.iter().any(|&(x, y, _)| (x, y) == (1, 0)));
        assert!(!pairs.iter().any(|&(x, y, _)| x == 0 && y == 2));
        assert!(pairs.iter().all(|&(x, y, s)| x != y && s >= 0.6));
    }

    #[test]
    fn test_top_k_bounds_neighbours() {
        let vectors: Vec<Vec<f32>> = (0..6).map(|i| vec![1.0, i as f32 * 0.01]).collect();
        let items: Vec<(NodeId, &[f32])> = vectors.iter().enumerate().map(|(i, v)| (i, v.as_slice())).collect();
        let pairs = semantic_pairs(&items, &config(0.5, 2, 100));
        for id in 0..6 {
            assert!(pairs.iter().filter(|p| p.0 == id).count() <= 2);
        }
    }

    #[test]
    fn test_ann_path_finds_close_pairs() {
        let mut vectors = Vec::new();
        for i in 0..40 {
            let axis = i % 4;
            let mut v = vec![0.0f32; 4];
            v[axis] = 1.0;
            v[(axis + 1) % 4] = 0.05 * (i / 4) as f32;
            vectors.push(v);
        }
        let items: Vec<(NodeId, &[f32])> = vectors.iter().enumerate().map(|(i, v)| (i, v.as_slice())).collect();
        let pairs = semantic_pairs(&items, &config(0.8, 3, 10));
        assert!(!pairs.is_empty());
        for (a, b, sim) in pairs {
            assert_ne!(a, b);
            assert!(sim >= 0.8);
            assert_eq!(a % 4, b % 4, "neighbours should share the dominant axis");
        }
    }

    #[test]
    fn test_too_few_nodes() {
        let a = [1.0, 0.0];
        assert!(semantic_pairs(&[(0, &a[..])], &config(0.1, 5, 100)).is_empty());
        assert!(semantic_pairs(&[], &config(0.1, 5, 100)).is_empty());
    }
}
