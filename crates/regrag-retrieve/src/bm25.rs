//! Okapi BM25 over every node of a graph.

use std::collections::HashMap;

use regrag_graph::{Graph, NodeId};

use crate::text::tokenize;

#[derive(Debug, Clone)]
pub struct Bm25Index {
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<f32>,
    avg_len: f32,
    doc_freq: HashMap<String, usize>,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    pub fn build(graph: &Graph, k1: f32, b: f32) -> Self {
        let mut term_freqs = Vec::with_capacity(graph.node_count());
        let mut doc_lens = Vec::with_capacity(graph.node_count());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for node in graph.nodes() {
            let mut tf: HashMap<String, u32> = HashMap::new();
            let tokens = tokenize(&node.content);
            doc_lens.push(tokens.len() as f32);
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<f32>() / doc_lens.len() as f32
        };
        Self {
            term_freqs,
            doc_lens,
            avg_len,
            doc_freq,
            k1,
            b,
        }
    }

    pub fn len(&self) -> usize {
        self.term_freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_freqs.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 score of one node for already tokenised query terms.
    pub fn score(&self, id: NodeId, query_terms: &[String]) -> f32 {
        let Some(tf) = self.term_freqs.get(id) else {
            return 0.0;
        };
        let len_norm = if self.avg_len > 0.0 {
            self.doc_lens[id] / self.avg_len
        } else {
            0.0
        };
        query_terms
            .iter()
            .filter_map(|term| tf.get(term).map(|&f| (term, f as f32)))
            .map(|(term, f)| {
                self.idf(term) * f * (self.k1 + 1.0) / (f + self.k1 * (1.0 - self.b + self.b * len_norm))
            })
            .sum()
    }

    /// Nodes with a positive score, best first, at most `top_n`.
    pub fn search(&self, query: &str, top_n: usize) -> Vec<(NodeId, f32)> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<(NodeId, f32)> = (0..self.len())
            .map(|id| (id, self.score(id, &terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        hits.truncate(top_n);
        hits
    }
}
