//! LLM classification of news items.
//!
//! Each item gets one call. Parse or transport failures mark the item
//! FAILED with the error text; it is not retried on later ticks.

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

use super::ExogenousItem;
use crate::llm::{extract_json, LlmClient};
use crate::types::{ClassificationStatus, Direction, Horizon};

const SYSTEM_PROMPT: &str = "You are a crypto market news analyst. For the news item given, judge \
its likely effect on BTC and ETH prices. Reply with a single JSON object: \
{\"direction\": \"BULLISH\"|\"BEARISH\"|\"NEUTRAL\", \"confidence\": 0.0-1.0, \
\"horizon\": \"SHORT\"|\"MEDIUM\"|\"LONG\", \"theme\": \"one to three words\"}. \
SHORT means hours, MEDIUM days, LONG weeks. No other text.";

const THEME_MAX_CHARS: usize = 60;

/// Parsed classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub direction: Direction,
    pub confidence: Decimal,
    pub horizon: Horizon,
    pub theme: Option<String>,
}

pub struct NewsClassifier {
    llm: Arc<dyn LlmClient>,
}

impl NewsClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn build_prompt(item: &ExogenousItem) -> String {
        let mut prompt = String::with_capacity(600);
        prompt.push_str(&format!("SOURCE: {}\n", item.source));
        prompt.push_str(&format!(
            "PUBLISHED: {}\n",
            item.published_at.format("%Y-%m-%d %H:%M UTC")
        ));
        prompt.push_str(&format!("TITLE: \"{}\"\n", item.title));
        if !item.summary.is_empty() {
            prompt.push_str(&format!("SUMMARY: {}\n", item.summary));
        }
        prompt
    }

    /// Classify one item in place. Returns whether it succeeded.
    pub async fn classify(&self, item: &mut ExogenousItem) -> bool {
        let prompt = Self::build_prompt(item);
        let result = match self.llm.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => parse_classification(&reply.text),
            Err(e) => Err(e),
        };

        match result {
            Ok(c) => {
                debug!(
                    url = %item.url,
                    direction = %c.direction,
                    confidence = %c.confidence,
                    horizon = %c.horizon,
                    "Classified news item"
                );
                item.status = ClassificationStatus::Classified;
                item.direction = Some(c.direction);
                item.confidence = Some(c.confidence);
                item.horizon = Some(c.horizon);
                item.theme = c.theme;
                item.error = None;
                true
            }
            Err(e) => {
                warn!(url = %item.url, error = %e, "News classification failed");
                item.status = ClassificationStatus::Failed;
                item.error = Some(format!("{e:#}"));
                false
            }
        }
    }
}

/// Tolerant parse of the classifier reply.
///
/// Accepts confidence as a number or string, and as a percentage when > 1.
/// Missing horizon defaults to MEDIUM.
pub fn parse_classification(text: &str) -> Result<Classification> {
    let json = extract_json(text)?;

    let direction: Direction = json
        .get("direction")
        .and_then(|v| v.as_str())
        .context("Missing direction")?
        .parse()?;

    let confidence = json
        .get("confidence")
        .and_then(decimal_from_json)
        .context("Missing or invalid confidence")?;
    let confidence = if confidence > Decimal::ONE {
        confidence / Decimal::ONE_HUNDRED
    } else {
        confidence
    }
    .clamp(Decimal::ZERO, Decimal::ONE);

    let horizon = match json.get("horizon").and_then(|v| v.as_str()) {
        Some(h) => h.parse()?,
        None => Horizon::Medium,
    };

    let theme = json
        .get("theme")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.chars().take(THEME_MAX_CHARS).collect());

    Ok(Classification {
        direction,
        confidence,
        horizon,
        theme,
    })
}

/// A decimal from a JSON number or numeric string.
pub(crate) fn decimal_from_json(v: &serde_json::Value) -> Option<Decimal> {
    match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        serde_json::Value::String(s) => {
            let s = s.trim().trim_end_matches('%').replace([',', '$'], "");
            Decimal::from_str(s.trim()).ok()
        }
        _ => None,
    }
}
