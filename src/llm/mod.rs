//! LLM integration.
//!
//! Defines the `LlmClient` trait used for trade suggestions and news
//! classification, an OpenAI-compatible chat client, and the prompt
//! builders / tolerant reply parsers.

pub mod openrouter;
pub mod prompts;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// A completed chat reply.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub text: String,
    pub model: String,
    pub tokens_used: u32,
}

/// Abstraction over a chat-completion LLM.
///
/// Calls are made once; callers record failures instead of retrying.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<LlmReply>;

    /// Model identifier string.
    fn model_name(&self) -> String;
}

/// Extract the first balanced `{...}` block from free text and parse it.
///
/// Models often wrap JSON in prose or code fences; this skips both.
pub fn extract_json(text: &str) -> Result<serde_json::Value> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("No JSON object in LLM reply"))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or_else(|| anyhow::anyhow!("Unterminated JSON object in LLM reply"))?;
    serde_json::from_str(&text[start..=end]).context("Invalid JSON in LLM reply")
}
