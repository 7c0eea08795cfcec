//! Provider traits for the two external services the engine talks to.
//!
//! The retrieval core only sees these traits; concrete backends are picked
//! once at startup by [`crate::create_embedder`] and [`crate::create_generator`].

use async_trait::async_trait;
use regrag_core::{EmbeddingError, GenerationError, ProviderError};

/// Turns text into fixed-length float vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }

    /// Provider-defined vector dimensionality.
    fn dimension(&self) -> usize;

    /// Whether the backend is configured at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// Text generation: community summaries and final answers.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn answer(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Summarize a set of document snippets into a short topical description.
    async fn summarize(&self, snippets: &[&str]) -> Result<String, GenerationError> {
        self.answer(&summary_prompt(snippets)).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Prompt used for community summaries.
pub fn summary_prompt(snippets: &[&str]) -> String {
    let mut prompt = String::from(
        "Tóm tắt ngắn gọn (2-3 câu) chủ đề chung của các đoạn văn bản quy định sau. \
         Nêu rõ loại quy định, đối tượng áp dụng và các nội dung chính.\n\n",
    );
    for (i, snippet) in snippets.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, snippet));
    }
    prompt.push_str("Tóm tắt:");
    prompt
}

/// Placeholder embedder used when no embedding endpoint is configured.
/// Every call fails, so graphs are built without semantic edges (BM25-only).
pub struct NoopEmbedder {
    dim: usize,
}

impl NoopEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingProvider for NoopEmbedder {
    async fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(ProviderError::Unavailable("no embedding provider configured".into()))
    }

    async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(ProviderError::Unavailable("no embedding provider configured".into()))
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Placeholder generator; summaries fall back to truncated concatenation.
pub struct NoopGenerator;

#[async_trait]
impl GenerationProvider for NoopGenerator {
    async fn answer(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(ProviderError::Unavailable("no generation provider configured".into()))
    }

    fn is_available(&self) -> bool {
        false
    }
}
