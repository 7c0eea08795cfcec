//! regrag graph — document graph construction, communities and persistence.

pub mod builder;
pub mod community;
pub mod graph;
pub mod louvain;
pub mod persist;
pub mod semantic;
pub mod vector;

pub use builder::{BuiltGraph, GraphStore};
pub use community::{Community, CommunityPartitioner};
pub use graph::{CommunityId, Edge, EdgeKind, EdgeRecord, Graph, GraphStats, Node, NodeId};
pub use persist::GraphFile;
