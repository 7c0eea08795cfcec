//! regrag infer — the external provider boundary.
//!
//! Provides the `EmbeddingProvider` and `GenerationProvider` traits, one
//! adapter per backend, retry/timeout policy, batched embedding and the
//! query-embedding cache. When no backend is configured the noop adapters are
//! used and the engine runs BM25-only with fallback summaries.

pub mod batch;
pub mod cache;
pub mod chat;
pub mod openai;
pub mod provider;
pub mod retry;

pub use batch::BatchEmbedder;
pub use cache::QueryCache;
pub use chat::{ChatGenerator, LLMProvider};
pub use openai::HttpEmbedder;
pub use provider::{EmbeddingProvider, GenerationProvider, NoopEmbedder, NoopGenerator};
pub use retry::RetryPolicy;

use std::sync::Arc;

use regrag_core::ProviderConfig;

/// Create the configured embedder, falling back to `NoopEmbedder`.
pub fn create_embedder(config: &ProviderConfig) -> Arc<dyn EmbeddingProvider> {
    match &config.embedding_url {
        Some(url) => {
            tracing::info!(
                "Using HTTP embedder {} (model={}, dim={})",
                url,
                config.embedding_model,
                config.embedding_dim
            );
            Arc::new(HttpEmbedder::new(
                url.clone(),
                config.embedding_model.clone(),
                config.embedding_api_key.clone(),
                config.embedding_dim,
            ))
        }
        None => {
            tracing::warn!("No embedding endpoint configured. Falling back to BM25-only.");
            Arc::new(NoopEmbedder::new(config.embedding_dim))
        }
    }
}

/// Create the configured generator, falling back to `NoopGenerator`.
pub fn create_generator(config: &ProviderConfig) -> Arc<dyn GenerationProvider> {
    match chat::resolve_provider(config) {
        Some((provider, model, key)) => {
            tracing::info!("Using {} generator (model={})", provider, model);
            Arc::new(ChatGenerator::new(provider, model, key))
        }
        None => {
            tracing::warn!("No generation provider configured. Summaries use fallback text.");
            Arc::new(NoopGenerator)
        }
    }
}
