//! OpenAI-compatible chat completions generator
//!
//! Works with any endpoint speaking `/v1/chat/completions` (hosted models,
//! LM Studio, vLLM, Ollama's compatibility layer).

use super::prompt::Prompt;
use super::TextGenerator;
use crate::config::LlmProviderSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct OpenAiCompatibleGenerator {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleGenerator {
    pub fn new(name: &str, settings: &LlmProviderSettings, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.to_chat_messages(),
            "temperature": 0.3,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            anyhow::bail!("LLM endpoint returned {}: {}", status, text.chars().take(200).collect::<String>());
        }
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;
        let content = extract_content(&json);
        debug!(provider = %self.name, chars = content.len(), "LLM response received");
        Ok(content)
    }
}

/// `choices[0].message.content`, empty when absent or null
fn extract_content(json: &serde_json::Value) -> String {
    json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(base_url: &str) -> OpenAiCompatibleGenerator {
        OpenAiCompatibleGenerator::new(
            "primary",
            &LlmProviderSettings {
                base_url: base_url.to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: Some(String::new()),
                timeout_ms: None,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(
            generator("https://models.example.com/v1/").endpoint(),
            "https://models.example.com/v1/chat/completions"
        );
        assert_eq!(
            generator("http://localhost:1234").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            generator("http://h/openai/chat/completions").endpoint(),
            "http://h/openai/chat/completions"
        );
    }

    #[test]
    fn test_blank_api_key_ignored() {
        assert!(generator("http://localhost:1234").api_key.is_none());
    }

    #[test]
    fn test_content_extraction() {
        let json = serde_json::json!({"choices": [{"message": {"content": "  Merhaba  "}}]});
        assert_eq!(extract_content(&json), "Merhaba");
        let null = serde_json::json!({"choices": [{"message": {"content": null}}]});
        assert_eq!(extract_content(&null), "");
        assert_eq!(extract_content(&serde_json::json!({})), "");
    }
}
