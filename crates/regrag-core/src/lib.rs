//! regrag core — error taxonomy, engine configuration, shared chunk type.

pub mod chunk;
pub mod config;
pub mod error;

pub use chunk::DocumentChunk;
pub use config::{
    DataPaths, DepartmentConfig, EngineConfig, GraphConfig, PartitionConfig, ProviderConfig,
    RetrievalConfig,
};
pub use error::{EmbeddingError, Error, GenerationError, ProviderError, Result};
