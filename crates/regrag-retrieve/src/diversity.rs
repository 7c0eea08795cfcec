//! Maximal-marginal-relevance selection.

use regrag_graph::vector::cosine;
use regrag_graph::{EdgeKind, Graph, NodeId};

#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    pub k: usize,
    /// Relevance weight; redundancy is weighted `1 - lambda`.
    pub lambda: f32,
    /// Share of the redundancy penalty kept between Structural neighbours.
    pub structural_penalty_factor: f32,
}

fn by_score_desc(candidates: &[(NodeId, f32)]) -> Vec<(NodeId, f32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    sorted
}

/// Redundancy of `candidate` against `chosen`, using embeddings.
fn redundancy(graph: &Graph, candidate: NodeId, chosen: NodeId, structural_factor: f32) -> f32 {
    let (Some(a), Some(b)) = (graph.embedding(candidate), graph.embedding(chosen)) else {
        return 0.0;
    };
    let sim = cosine(a, b).max(0.0);
    match graph.edge_between(candidate, chosen) {
        Some(edge) if edge.kind == EdgeKind::Structural => sim * structural_factor,
        _ => sim,
    }
}

/// Pick up to `k` node ids balancing score against similarity to what is
/// already picked. Each id comes with the MMR value it was selected at,
/// `lambda * relevance - (1 - lambda) * redundancy` with relevance scaled by
/// the best score; the values never increase along the result. With no more
/// than `k` candidates nothing is penalised and the order is by score.
pub fn mmr_select(candidates: &[(NodeId, f32)], graph: &Graph, params: MmrParams) -> Vec<(NodeId, f32)> {
    let sorted = by_score_desc(candidates);
    let max = sorted.first().map(|c| c.1).unwrap_or(0.0);
    let relevance = |score: f32| if max > 0.0 { score / max } else { 0.0 };

    if sorted.len() <= params.k {
        return sorted
            .into_iter()
            .map(|(id, score)| (id, params.lambda * relevance(score)))
            .collect();
    }

    let mut remaining = sorted;
    let mut selected: Vec<(NodeId, f32)> = Vec::with_capacity(params.k);
    while selected.len() < params.k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (idx, &(id, score)) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|&(s, _)| redundancy(graph, id, s, params.structural_penalty_factor))
                .fold(0.0f32, f32::max);
            let value = params.lambda * relevance(score) - (1.0 - params.lambda) * max_sim;
            if value > best_value {
                best_value = value;
                best_idx = idx;
            }
        }
        selected.push((remaining.remove(best_idx).0, best_value));
    }
    selected
}
