//! Batched, rate-limited embedding with per-text degradation.

use std::sync::Arc;
use std::time::Duration;

use regrag_core::{EmbeddingError, ProviderConfig, ProviderError};
use tracing::{debug, info, warn};

use crate::provider::EmbeddingProvider;
use crate::retry::RetryPolicy;

/// Wraps an [`EmbeddingProvider`] with retry, batching and dimension checks.
///
/// A text whose retries are exhausted comes back as `None`; callers treat the
/// corresponding node as embedding-less instead of aborting.
#[derive(Clone)]
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        policy: RetryPolicy,
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Self {
        Self {
            provider,
            policy,
            batch_size: batch_size.max(1),
            inter_batch_delay,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &ProviderConfig) -> Self {
        Self::new(
            provider,
            RetryPolicy::from_config(config),
            config.batch_size,
            config.inter_batch_delay(),
        )
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    /// Embed one text with retry and dimension validation.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let provider = &self.provider;
        let vector = self
            .policy
            .run("embed_one", || provider.embed_one(text))
            .await?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    /// Embed every text, batch by batch, pausing between batches.
    pub async fn embed_all(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        if texts.is_empty() {
            return Vec::new();
        }
        if !self.provider.is_available() {
            info!("Embedding provider unavailable; {} texts left unembedded", texts.len());
            return vec![None; texts.len()];
        }

        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let batch_count = texts.len().div_ceil(self.batch_size);

        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }

            let provider = &self.provider;
            let result = self
                .policy
                .run("embed_batch", || provider.embed_batch(batch))
                .await
                .and_then(|vectors| {
                    if vectors.len() == batch.len() {
                        Ok(vectors)
                    } else {
                        Err(ProviderError::InvalidResponse(format!(
                            "expected {} vectors, got {}",
                            batch.len(),
                            vectors.len()
                        )))
                    }
                });

            match result {
                Ok(vectors) => {
                    for vector in vectors {
                        out.push(self.check_dimension(&vector).ok().map(|_| vector));
                    }
                }
                Err(e) => {
                    warn!(
                        "Batch {}/{} failed ({}); embedding texts individually",
                        i + 1,
                        batch_count,
                        e
                    );
                    for text in batch {
                        match self.embed_one(text).await {
                            Ok(vector) => out.push(Some(vector)),
                            Err(e) => {
                                warn!("Text left without embedding: {}", e);
                                out.push(None);
                            }
                        }
                    }
                }
            }
        }

        let embedded = out.iter().filter(|v| v.is_some()).count();
        debug!("Embedded {}/{} texts in {} batches", embedded, texts.len(), batch_count);
        out
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        let expected = self.provider.dimension();
        if vector.len() != expected {
            return Err(ProviderError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
