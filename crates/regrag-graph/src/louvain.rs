//! Modularity-based community detection on a compact weighted adjacency list.
//!
//! `adj[i]` lists `(j, w)` for every undirected edge `i - j`; each edge appears
//! once in each endpoint's list. Self-loops appear once and carry twice the
//! internal weight (only produced by aggregation). All iteration is in index
//! order so results are deterministic.

use std::collections::BTreeMap;

pub type Adjacency = Vec<Vec<(usize, f64)>>;

/// Clustering result: a local community label per node, labels dense from 0.
pub fn detect(adj: &Adjacency, max_passes: usize) -> Vec<usize> {
    let louvain_labels = louvain(adj, max_passes);
    if modularity(adj, &louvain_labels) > 0.0 {
        return louvain_labels;
    }
    // Degenerate inputs (no edges, cliques) give Louvain nothing to optimise.
    label_propagation(adj, 100)
}

/// Multi-level Louvain.
pub fn louvain(adj: &Adjacency, max_passes: usize) -> Vec<usize> {
    let n = adj.len();
    let mut membership: Vec<usize> = (0..n).collect();
    let mut level = adj.clone();

    for _ in 0..max_passes.max(1) {
        let (labels, moved) = one_level(&level);
        if !moved {
            break;
        }
        let labels = compact(&labels);
        for m in membership.iter_mut() {
            *m = labels[*m];
        }
        level = aggregate(&level, &labels);
        if level.len() <= 1 {
            break;
        }
    }
    compact(&membership)
}

/// Local moving phase. Returns labels and whether any node moved.
fn one_level(adj: &Adjacency) -> (Vec<usize>, bool) {
    let n = adj.len();
    let degree: Vec<f64> = adj.iter().map(|row| row.iter().map(|(_, w)| w).sum()).collect();
    let m2: f64 = degree.iter().sum();
    let mut label: Vec<usize> = (0..n).collect();
    if m2 <= 0.0 {
        return (label, false);
    }
    let mut tot: Vec<f64> = degree.clone();

    let mut any_moved = false;
    loop {
        let mut moved = false;
        for i in 0..n {
            let current = label[i];
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(j, w) in &adj[i] {
                if j != i {
                    *links.entry(label[j]).or_insert(0.0) += w;
                }
            }

            tot[current] -= degree[i];
            let gain = |c: usize, k_in: f64| k_in - tot[c] * degree[i] / m2;

            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            for (&c, &k_in) in &links {
                let g = gain(c, k_in);
                if g > best_gain + 1e-12 {
                    best = c;
                    best_gain = g;
                }
            }

            tot[best] += degree[i];
            if best != current {
                label[i] = best;
                moved = true;
                any_moved = true;
            }
        }
        if !moved {
            break;
        }
    }
    (label, any_moved)
}

/// Collapse communities into super-nodes, summing edge weights.
fn aggregate(adj: &Adjacency, labels: &[usize]) -> Adjacency {
    let count = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut merged: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
    for (i, row) in adj.iter().enumerate() {
        for &(j, w) in row {
            *merged[labels[i]].entry(labels[j]).or_insert(0.0) += w;
        }
    }
    merged.into_iter().map(|row| row.into_iter().collect()).collect()
}

/// Relabel so that labels are dense and ordered by first appearance.
fn compact(labels: &[usize]) -> Vec<usize> {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    let mut next = 0;
    labels
        .iter()
        .map(|l| {
            *mapping.entry(*l).or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}

/// Weighted label propagation; ties go to the smallest label.
pub fn label_propagation(adj: &Adjacency, max_iterations: usize) -> Vec<usize> {
    let n = adj.len();
    let mut label: Vec<usize> = (0..n).collect();
    for _ in 0..max_iterations {
        let mut changed = false;
        for i in 0..n {
            let mut votes: BTreeMap<usize, f64> = BTreeMap::new();
            for &(j, w) in &adj[i] {
                if j != i {
                    *votes.entry(label[j]).or_insert(0.0) += w;
                }
            }
            let Some((&best, &best_w)) = votes
                .iter()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal).then(b.0.cmp(a.0)))
            else {
                continue;
            };
            let current_w = votes.get(&label[i]).copied().unwrap_or(0.0);
            if best != label[i] && best_w > current_w + 1e-12 {
                label[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    compact(&label)
}

/// Newman modularity of a labelling.
pub fn modularity(adj: &Adjacency, labels: &[usize]) -> f64 {
    let degree: Vec<f64> = adj.iter().map(|row| row.iter().map(|(_, w)| w).sum()).collect();
    let m2: f64 = degree.iter().sum();
    if m2 <= 0.0 {
        return 0.0;
    }
    let mut internal: BTreeMap<usize, f64> = BTreeMap::new();
    let mut tot: BTreeMap<usize, f64> = BTreeMap::new();
    for (i, row) in adj.iter().enumerate() {
        *tot.entry(labels[i]).or_insert(0.0) += degree[i];
        for &(j, w) in row {
            if labels[i] == labels[j] {
                *internal.entry(labels[i]).or_insert(0.0) += w;
            }
        }
    }
    tot.iter()
        .map(|(c, t)| internal.get(c).copied().unwrap_or(0.0) / m2 - (t / m2).powi(2))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn undirected(n: usize, edges: &[(usize, usize, f64)]) -> Adjacency {
        let mut adj = vec![Vec::new(); n];
        for &(a, b, w) in edges {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        adj
    }

    /// Two triangles joined by a single weak bridge.
    fn barbell() -> Adjacency {
        undirected(
            6,
            &[
                (0, 1, 1.0),
                (1, 2, 1.0),
                (0, 2, 1.0),
                (3, 4, 1.0),
                (4, 5, 1.0),
                (3, 5, 1.0),
                (2, 3, 0.1),
            ],
        )
    }

    #[test]
    fn test_louvain_splits_barbell() {
        let labels = louvain(&barbell(), 10);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert!(modularity(&barbell(), &labels) > 0.3);
    }

    #[test]
    fn test_label_propagation_splits_barbell() {
        let labels = label_propagation(&barbell(), 100);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[5]);
    }

    #[test]
    fn test_no_edges_gives_singletons() {
        let adj: Adjacency = vec![Vec::new(); 3];
        assert_eq!(detect(&adj, 10), vec![0, 1, 2]);
    }

    #[test]
    fn test_labels_are_dense() {
        let labels = detect(&barbell(), 10);
        let max = *labels.iter().max().unwrap();
        for l in 0..=max {
            assert!(labels.contains(&l));
        }
    }

    #[test]
    fn test_compact_orders_by_first_appearance() {
        assert_eq!(compact(&[7, 3, 7, 9]), vec![0, 1, 0, 2]);
    }
}
