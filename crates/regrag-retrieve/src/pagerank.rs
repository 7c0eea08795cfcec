//! Weighted PageRank over the undirected document graph.

use regrag_graph::Graph;

pub struct PageRankConfig {
    pub damping_factor: f64,
    pub iterations: usize,
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping_factor: 0.85,
            iterations: 30,
            tolerance: 1e-6,
        }
    }
}

/// PageRank indexed by node id, scaled so the maximum is 1.0.
pub fn page_rank(graph: &Graph, config: &PageRankConfig) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    let strength: Vec<f64> = (0..n).map(|i| graph.weighted_degree(i)).collect();
    let d = config.damping_factor;
    let mut scores = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];

    for _ in 0..config.iterations {
        // Rank held by isolated nodes is spread uniformly.
        let dangling: f64 = (0..n).filter(|&i| strength[i] <= 0.0).map(|i| scores[i]).sum();
        let base = (1.0 - d) / n as f64 + d * dangling / n as f64;

        let mut diff = 0.0;
        for i in 0..n {
            let incoming: f64 = graph
                .neighbors(i)
                .filter(|&(j, _)| strength[j] > 0.0)
                .map(|(j, edge)| scores[j] * edge.weight as f64 / strength[j])
                .sum();
            next[i] = base + d * incoming;
            diff += (next[i] - scores[i]).abs();
        }
        scores.copy_from_slice(&next);
        if diff < config.tolerance {
            break;
        }
    }

    let max = scores.iter().cloned().fold(0.0, f64::max);
    if max > 0.0 {
        for s in scores.iter_mut() {
            *s /= max;
        }
    }
    scores
}
