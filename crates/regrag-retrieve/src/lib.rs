//! regrag retrieve — graph-routed hybrid retrieval.

pub mod bm25;
pub mod diversity;
pub mod hybrid;
pub mod pagerank;
pub mod text;
pub mod types;

pub use bm25::Bm25Index;
pub use hybrid::HybridRetriever;
pub use types::{RetrievedChunk, ScoreBreakdown};
