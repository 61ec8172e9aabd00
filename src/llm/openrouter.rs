//! OpenAI-compatible chat completions client.
//!
//! Defaults to OpenRouter's unified endpoint, but any server speaking the
//! `/chat/completions` format works (set `llm.base_url`). One attempt per
//! call: failures surface to the caller, which records them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{LlmClient, LlmReply};
use crate::config::LlmConfig;
use crate::types::AgentError;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenRouterClient {
    pub fn new(cfg: &LlmConfig, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }

    fn llm_error(&self, message: impl Into<String>) -> anyhow::Error {
        AgentError::Llm {
            model: self.model.clone(),
            message: message.into(),
        }
        .into()
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmReply> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.2,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        debug!(model = %self.model, prompt_len = user.len(), "Sending chat completion");

        let response = self
            .http
            .post(&self.base_url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .header("X-Title", "crypto-agent")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.llm_error(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.model, "LLM API error");
            return Err(self.llm_error(format!("HTTP {status}: {body}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.llm_error(format!("unparseable response: {e}")))?;

        let text = body
            .choices
            .into_iter()
            .filter_map(|c| c.message)
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(self.llm_error("empty completion"));
        }

        Ok(LlmReply {
            text,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            tokens_used: body.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_openai_shape() {
        let req = ChatRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.2,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn test_response_parses_minimal_body() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}],"usage":{"total_tokens":12}}"#,
        )
        .unwrap();
        assert_eq!(body.choices.len(), 1);
        assert_eq!(body.usage.unwrap().total_tokens, 12);
        assert!(body.model.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_llm_error() {
        let cfg = LlmConfig {
            base_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let client = OpenRouterClient::new(&cfg, SecretString::new("k".to_string())).unwrap();
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(err.to_string().contains("LLM error"));
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::Llm { .. })
        ));
    }
}
