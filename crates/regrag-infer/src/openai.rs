//! OpenAI-compatible `/embeddings` adapter.

use async_trait::async_trait;
use regrag_core::{EmbeddingError, ProviderError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::provider::EmbeddingProvider;

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Embedding backend speaking the OpenAI embeddings wire format.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: Option<String>, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            model: model.into(),
            api_key,
            dimension,
        }
    }

    async fn request(&self, input: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&json!({ "model": self.model, "input": input }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        debug!("Embedding {} texts via {}", input.len(), self.url);
        let response = request.send().await.map_err(map_transport_error)?;
        check_status(response.status())?;

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding list".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Map an HTTP status onto the provider error taxonomy.
pub(crate) fn check_status(status: StatusCode) -> Result<(), ProviderError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Err(ProviderError::RateLimited)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Err(ProviderError::Unavailable(format!("API returned status {}", status)))
    } else {
        Err(ProviderError::InvalidResponse(format!("API returned status {}", status)))
    }
}

pub(crate) fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(format!("Request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert_eq!(check_status(StatusCode::TOO_MANY_REQUESTS), Err(ProviderError::RateLimited));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(ProviderError::Unavailable(_))
        ));
        assert!(matches!(
            check_status(StatusCode::UNAUTHORIZED),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_response_parsing_reorders_by_index() {
        let raw = r#"{"data":[{"embedding":[0.5],"index":1},{"embedding":[0.25],"index":0}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|item| item.index);
        assert_eq!(parsed.data[0].embedding, vec![0.25]);
    }
}
