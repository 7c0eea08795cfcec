//! Chat-completion generation backends (OpenAI, Groq, Anthropic).
//!
//! OpenAI and Groq share the same wire format; Anthropic uses its own
//! Messages API with the system prompt hoisted out of the message list.

use async_trait::async_trait;
use regrag_core::{GenerationError, ProviderConfig, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::openai::{check_status, map_transport_error};
use crate::provider::GenerationProvider;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

const SYSTEM_PROMPT: &str = "Bạn là trợ lý tra cứu văn bản quy định. \
Chỉ trả lời dựa trên ngữ cảnh được cung cấp.";

/// LLM provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    OpenAI,
    Anthropic,
    Groq,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Groq => write!(f, "groq"),
        }
    }
}

/// Resolve which provider, model and key to use.
///
/// An explicit preference wins when its key is set; "auto" prefers
/// Anthropic, then Groq, then OpenAI.
pub fn resolve_provider(config: &ProviderConfig) -> Option<(LLMProvider, String, String)> {
    let openai = || {
        config
            .openai_api_key
            .as_ref()
            .map(|k| (LLMProvider::OpenAI, config.openai_model.clone(), k.clone()))
    };
    let anthropic = || {
        config
            .anthropic_api_key
            .as_ref()
            .map(|k| (LLMProvider::Anthropic, config.anthropic_model.clone(), k.clone()))
    };
    let groq = || {
        config
            .groq_api_key
            .as_ref()
            .map(|k| (LLMProvider::Groq, config.groq_model.clone(), k.clone()))
    };

    match config.preferred_chat_provider.as_str() {
        "openai" => openai(),
        "anthropic" => anthropic(),
        "groq" => groq(),
        "auto" => anthropic().or_else(groq).or_else(openai),
        _ => None,
    }
}

/// Non-streaming chat completion client.
pub struct ChatGenerator {
    client: Client,
    provider: LLMProvider,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: usize,
}

impl ChatGenerator {
    pub fn new(provider: LLMProvider, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            provider,
            model: model.into(),
            api_key: api_key.into(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }

    async fn complete_openai_compat(&self, url: &str, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        debug!("Completion from {} with model {}", url, self.model);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(response.status())?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))
    }

    async fn complete_anthropic(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        debug!("Completion from Anthropic with model {}", self.model);
        let response = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(response.status())?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        extract_anthropic_text(&parsed)
    }
}

fn extract_anthropic_text(parsed: &Value) -> Result<String, GenerationError> {
    let blocks = parsed["content"]
        .as_array()
        .ok_or_else(|| ProviderError::InvalidResponse("missing content blocks".into()))?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    Ok(text.trim().to_string())
}

#[async_trait]
impl GenerationProvider for ChatGenerator {
    async fn answer(&self, prompt: &str) -> Result<String, GenerationError> {
        match self.provider {
            LLMProvider::OpenAI => self.complete_openai_compat(OPENAI_URL, prompt).await,
            LLMProvider::Groq => self.complete_openai_compat(GROQ_URL, prompt).await,
            LLMProvider::Anthropic => self.complete_anthropic(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_prefers_anthropic() {
        let config = ProviderConfig {
            openai_api_key: Some("sk-o".into()),
            anthropic_api_key: Some("sk-a".into()),
            ..Default::default()
        };
        let (provider, model, key) = resolve_provider(&config).unwrap();
        assert_eq!(provider, LLMProvider::Anthropic);
        assert_eq!(model, config.anthropic_model);
        assert_eq!(key, "sk-a");
    }

    #[test]
    fn test_explicit_preference_requires_key() {
        let config = ProviderConfig {
            preferred_chat_provider: "groq".into(),
            openai_api_key: Some("sk-o".into()),
            ..Default::default()
        };
        assert!(resolve_provider(&config).is_none());
    }

    #[test]
    fn test_no_keys_resolves_nothing() {
        assert!(resolve_provider(&ProviderConfig::default()).is_none());
    }

    #[test]
    fn test_extract_anthropic_text() {
        let parsed = json!({"content": [{"type": "text", "text": " Quy định học phí. "}]});
        assert_eq!(extract_anthropic_text(&parsed).unwrap(), "Quy định học phí.");
        assert!(extract_anthropic_text(&json!({})).is_err());
    }
}
