//! Fetch → classify → score → cluster, run as one sequential batch.
//!
//! Only one refresh runs at a time. The timer loop and the HTTP endpoint
//! both go through [`RefreshGate`], which also enforces a cooldown between
//! consecutive refreshes.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::classifier::NewsClassifier;
use super::narrative::{ExogenousModifiers, ExogenousNarrativeAggregator};
use super::rss::NewsSource;
use super::scoring::ExogenousScoring;
use super::ExogenousItem;
use crate::config::ExogenousConfig;
use crate::storage::{Database, DbResult};

/// Counts from one refresh, returned by `POST /api/exogenous/refresh`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub feeds_ok: usize,
    pub feed_errors: Vec<String>,
    pub fetched: usize,
    pub new_items: usize,
    pub classified: usize,
    pub classification_failed: usize,
    pub scored: usize,
    pub narratives: usize,
    pub modifiers: ExogenousModifiers,
}

pub struct ExogenousPipeline {
    db: Database,
    source: Arc<dyn NewsSource>,
    /// None when the LLM is disabled; items then stay PENDING.
    classifier: Option<NewsClassifier>,
    cfg: ExogenousConfig,
    gate: RefreshGate,
}

impl ExogenousPipeline {
    pub fn new(
        db: Database,
        source: Arc<dyn NewsSource>,
        classifier: Option<NewsClassifier>,
        cfg: ExogenousConfig,
    ) -> Self {
        let gate = RefreshGate::new(std::time::Duration::from_secs(cfg.refresh_cooldown_secs));
        Self {
            db,
            source,
            classifier,
            cfg,
            gate,
        }
    }

    pub fn gate(&self) -> &RefreshGate {
        &self.gate
    }

    /// Run the whole pipeline once. Callers that may race should hold a
    /// permit from [`Self::gate`] for the duration.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let started_at = Utc::now();
        let repo = self.db.exogenous();

        // 1. Fetch and upsert
        let mut feeds_ok = 0;
        let mut feed_errors = Vec::new();
        let mut fetched = 0;
        let mut new_items = 0;
        for feed in &self.cfg.feeds {
            let items = match self.source.fetch(feed).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(feed = %feed.name, error = %e, "Feed fetch failed, skipping");
                    feed_errors.push(format!("{}: {e:#}", feed.name));
                    continue;
                }
            };
            feeds_ok += 1;
            fetched += items.len();
            for item in &items {
                match repo.upsert_item(item).await {
                    Ok(true) => new_items += 1,
                    Ok(false) => {}
                    Err(e) => warn!(url = %item.url, error = %e, "Failed to store news item"),
                }
            }
        }
        debug!(fetched, new_items, "Feeds ingested");

        // 2. Classify a bounded batch of pending items
        let mut classified = 0;
        let mut classification_failed = 0;
        if let Some(classifier) = &self.classifier {
            let pending = repo
                .pending_items(self.cfg.max_classify_per_tick as i64)
                .await
                .context("Failed to load pending news items")?;
            for mut item in pending {
                if classifier.classify(&mut item).await {
                    classified += 1;
                } else {
                    classification_failed += 1;
                }
                if let Err(e) = repo.save_classification(&item).await {
                    warn!(url = %item.url, error = %e, "Failed to save classification");
                }
            }
        }

        // 3. Rescore the lookback window
        let now = Utc::now();
        let mut items = repo
            .items_since(now - Duration::hours(self.cfg.lookback_hours))
            .await
            .context("Failed to load recent news items")?;
        for item in &mut items {
            item.contribution = ExogenousScoring::score_item(item, now, &self.cfg);
        }
        repo.save_contributions(&items)
            .await
            .context("Failed to save contributions")?;

        // 4. Rebuild narratives from classified items
        let scored: Vec<ExogenousItem> = items.into_iter().filter(|i| i.is_classified()).collect();
        let narratives =
            ExogenousNarrativeAggregator::aggregate(&scored, self.cfg.similarity_threshold, now);
        let saved = repo
            .replace_narratives(&narratives)
            .await
            .context("Failed to replace narratives")?;
        let modifiers = ExogenousNarrativeAggregator::modifiers(&saved);

        let report = RefreshReport {
            started_at,
            finished_at: Utc::now(),
            feeds_ok,
            feed_errors,
            fetched,
            new_items,
            classified,
            classification_failed,
            scored: scored.len(),
            narratives: saved.len(),
            modifiers,
        };

        info!(
            new_items = report.new_items,
            classified = report.classified,
            failed = report.classification_failed,
            narratives = report.narratives,
            net_score = %report.modifiers.net_score,
            bias = %report.modifiers.bias,
            "Exogenous refresh complete"
        );
        Ok(report)
    }

    pub async fn current_modifiers(&self) -> DbResult<ExogenousModifiers> {
        load_modifiers(&self.db).await
    }
}

/// Modifiers from the narratives currently stored.
pub async fn load_modifiers(db: &Database) -> DbResult<ExogenousModifiers> {
    let narratives = db.exogenous().narratives().await?;
    Ok(ExogenousNarrativeAggregator::modifiers(&narratives))
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshRejection {
    #[error("A refresh is already running")]
    Busy,

    #[error("Refresh cooling down, retry in {retry_after_secs}s")]
    CoolingDown { retry_after_secs: u64 },
}

/// One refresh in flight, plus a cooldown measured from the end of the
/// previous one.
pub struct RefreshGate {
    permits: Arc<Semaphore>,
    cooldown: std::time::Duration,
    last_finished: Arc<Mutex<Option<Instant>>>,
}

/// Held while a refresh runs. Dropping it starts the cooldown.
pub struct RefreshPermit {
    _permit: OwnedSemaphorePermit,
    last_finished: Arc<Mutex<Option<Instant>>>,
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        let mut last = self
            .last_finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Instant::now());
    }
}

impl RefreshGate {
    pub fn new(cooldown: std::time::Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            cooldown,
            last_finished: Arc::new(Mutex::new(None)),
        }
    }

    pub fn try_begin(&self) -> Result<RefreshPermit, RefreshRejection> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| RefreshRejection::Busy)?;

        let last = *self
            .last_finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(finished) = last {
            let elapsed = finished.elapsed();
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                return Err(RefreshRejection::CoolingDown {
                    retry_after_secs: remaining.as_secs().max(1),
                });
            }
        }

        Ok(RefreshPermit {
            _permit: permit,
            last_finished: self.last_finished.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
