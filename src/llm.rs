use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Text-in, text-out language model.
///
/// The engine treats any `Err` as an empty completion and moves on to its
/// next fallback, so implementations should not retry internally.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You are a precise data query assistant. Return only what is asked for, no commentary.";

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| EngineError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!("Requesting completion from {} ({} prompt chars)", self.model, prompt.len());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| EngineError::Provider(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Provider(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(EngineError::Provider(format!("LLM API returned {}: {}", status, message)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::Provider("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}
