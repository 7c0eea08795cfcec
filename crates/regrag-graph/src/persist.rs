//! Persisted graph files.
//!
//! One file per department: a bincode envelope carrying a magic tag, the
//! format version, a SHA-256 checksum of the payload and the payload itself
//! (nodes, edges, communities). The ANN index is never stored.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use regrag_core::{Error, Result};

use crate::builder::BuiltGraph;
use crate::community::Community;
use crate::graph::{EdgeRecord, Graph, Node};

pub const MAGIC: &str = "REGRAG-GRAPH";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    magic: String,
    format_version: u32,
    checksum: String,
    payload: Vec<u8>,
}

/// Serialized contents of one department graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFile {
    pub department: String,
    pub built_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
    pub edges: Vec<EdgeRecord>,
    /// Empty when the file was written without communities; loaders then
    /// re-derive them.
    pub communities: Vec<Community>,
}

impl GraphFile {
    pub fn from_built(department: &str, built: &BuiltGraph) -> Self {
        Self {
            department: department.to_string(),
            built_at: Utc::now(),
            nodes: built.graph.nodes().cloned().collect(),
            edges: built.graph.edge_records(),
            communities: built.partitioner.communities().cloned().collect(),
        }
    }

    pub fn has_communities(&self) -> bool {
        !self.communities.is_empty()
    }

    /// Rebuild the in-memory graph; returns it with the stored communities.
    pub fn into_graph(self) -> Result<(Graph, Vec<Community>)> {
        let mut graph = Graph::new();
        for (position, node) in self.nodes.into_iter().enumerate() {
            if node.id != position {
                return Err(Error::Serialization(format!(
                    "node id {} stored at position {}",
                    node.id, position
                )));
            }
            graph.push_node(node);
        }
        for edge in self.edges {
            if !graph.add_edge(edge.a, edge.b, edge.kind, edge.weight) {
                return Err(Error::Serialization(format!(
                    "invalid or duplicate edge {}-{}",
                    edge.a, edge.b
                )));
            }
        }
        Ok((graph, self.communities))
    }
}

fn checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Write `file` to `path` atomically (temp file then rename).
pub fn save(path: &Path, file: &GraphFile) -> Result<()> {
    let payload = bincode::serialize(file).map_err(|e| Error::Serialization(e.to_string()))?;
    let envelope = Envelope {
        magic: MAGIC.to_string(),
        format_version: FORMAT_VERSION,
        checksum: checksum(&payload),
        payload,
    };
    let bytes = bincode::serialize(&envelope).map_err(|e| Error::Serialization(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    info!(
        "Saved graph '{}' ({} nodes, {} edges, {} bytes) to {}",
        file.department,
        file.nodes.len(),
        file.edges.len(),
        bytes.len(),
        path.display()
    );
    Ok(())
}

/// Read and verify a graph file.
pub fn load(path: &Path) -> Result<GraphFile> {
    if !path.exists() {
        return Err(Error::NotFound(format!("graph file {}", path.display())));
    }
    let bytes = fs::read(path)?;
    let envelope: Envelope = bincode::deserialize(&bytes)
        .map_err(|e| Error::Serialization(format!("{}: unreadable envelope ({})", path.display(), e)))?;

    if envelope.magic != MAGIC {
        return Err(Error::Serialization(format!("{}: not a graph file", path.display())));
    }
    if envelope.format_version != FORMAT_VERSION {
        return Err(Error::Serialization(format!(
            "{}: format version {} (expected {})",
            path.display(),
            envelope.format_version,
            FORMAT_VERSION
        )));
    }
    if checksum(&envelope.payload) != envelope.checksum {
        return Err(Error::Serialization(format!("{}: checksum mismatch", path.display())));
    }

    let file: GraphFile = bincode::deserialize(&envelope.payload)
        .map_err(|e| Error::Serialization(format!("{}: {}", path.display(), e)))?;
    debug!(
        "Loaded graph '{}' built at {} from {}",
        file.department,
        file.built_at,
        path.display()
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::CommunityPartitioner;
    use crate::graph::EdgeKind;
    use regrag_core::{DocumentChunk, PartitionConfig};

    fn built() -> BuiltGraph {
        let mut graph = Graph::new();
        graph.add_chunk(DocumentChunk::new("học phí").with("category", "fee"));
        graph.add_chunk(DocumentChunk::new("miễn giảm").with("category", "fee"));
        graph.add_chunk(DocumentChunk::new("khen thưởng").with("category", "award"));
        graph.set_embedding(0, Some(vec![0.5, 0.5]));
        graph.set_embedding(2, Some(vec![1.0, 0.0]));
        graph.add_edge(0, 1, EdgeKind::Structural, 1.0);
        graph.add_edge(1, 2, EdgeKind::Metadata("department".into()), 0.7);
        let mut partitioner = CommunityPartitioner::new(PartitionConfig::default(), "category");
        partitioner.partition_without_summaries(&mut graph);
        BuiltGraph { graph, partitioner }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finance.graph");
        let original = built();
        save(&path, &GraphFile::from_built("finance", &original)).unwrap();

        let file = load(&path).unwrap();
        assert_eq!(file.department, "finance");
        let (graph, communities) = file.into_graph().unwrap();
        assert_eq!(graph, original.graph);
        let expected: Vec<Community> = original.partitioner.communities().cloned().collect();
        assert_eq!(communities, expected);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.graph");
        save(&path, &GraphFile::from_built("x", &built())).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(load(&path), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.graph");
        let payload = bincode::serialize(&GraphFile::from_built("old", &built())).unwrap();
        let envelope = Envelope {
            magic: MAGIC.to_string(),
            format_version: FORMAT_VERSION + 1,
            checksum: checksum(&payload),
            payload,
        };
        fs::write(&path, bincode::serialize(&envelope).unwrap()).unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn test_garbage_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.graph");
        fs::write(&path, b"not a graph").unwrap();
        assert!(matches!(load(&path), Err(Error::Serialization(_))));
        assert!(matches!(
            load(&dir.path().join("absent.graph")),
            Err(Error::NotFound(_))
        ));
    }
}
