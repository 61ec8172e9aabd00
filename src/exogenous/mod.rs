//! Exogenous news pipeline.
//!
//! RSS/Atom feeds are fetched, each new item is classified by the LLM
//! (direction, confidence, horizon, theme), scored, and clustered into
//! narratives. The resulting modifiers are attached to every agent decision.

pub mod classifier;
pub mod narrative;
pub mod pipeline;
pub mod rss;
pub mod scoring;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{ClassificationStatus, Direction, Horizon};

pub use narrative::{ExogenousModifiers, ExogenousNarrativeAggregator, Narrative};
pub use pipeline::{
    load_modifiers, ExogenousPipeline, RefreshGate, RefreshPermit, RefreshRejection, RefreshReport,
};
pub use scoring::ExogenousScoring;

/// A news item, unique by URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExogenousItem {
    pub id: Option<i64>,
    pub source: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub status: ClassificationStatus,
    pub direction: Option<Direction>,
    pub confidence: Option<Decimal>,
    pub horizon: Option<Horizon>,
    pub theme: Option<String>,
    pub error: Option<String>,
    pub contribution: Decimal,
    pub narrative_id: Option<i64>,
}

impl ExogenousItem {
    /// A freshly fetched, unclassified item.
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        summary: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            source: source.into(),
            title: title.into(),
            url: url.into(),
            summary: summary.into(),
            published_at,
            fetched_at: Utc::now(),
            status: ClassificationStatus::Pending,
            direction: None,
            confidence: None,
            horizon: None,
            theme: None,
            error: None,
            contribution: Decimal::ZERO,
            narrative_id: None,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.status == ClassificationStatus::Classified
    }
}
