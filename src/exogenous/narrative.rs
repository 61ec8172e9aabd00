//! Narrative aggregation.
//!
//! Clusters scored news items into narratives with cosine similarity over
//! bag-of-words vectors, then derives the modifiers attached to every
//! agent decision. Clusters are rebuilt from scratch on each ingestion
//! tick; there is no incremental state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;

use super::ExogenousItem;
use crate::types::{Bias, Direction};

/// Scores inside this band around zero are reported as neutral.
const NEUTRAL_BAND: Decimal = dec!(0.05);
/// Net score beyond which the bias leaves neutral.
const BIAS_THRESHOLD: Decimal = dec!(0.10);
const LABEL_TERMS: usize = 3;
const KEYWORD_TERMS: usize = 8;
const TOP_NARRATIVES: usize = 5;
const MIN_TOKEN_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "day", "get", "has", "him", "his", "how", "its", "may", "new", "now",
    "old", "see", "two", "who", "did", "yes", "she", "too", "use", "with", "that", "this",
    "from", "they", "will", "would", "there", "their", "what", "about", "which", "when", "make",
    "like", "time", "just", "know", "take", "into", "year", "your", "some", "could", "them",
    "than", "then", "look", "only", "come", "over", "also", "after", "back", "other", "more",
    "says", "said", "amid", "as", "week", "today", "here", "why", "what's", "been", "were",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Narrative {
    pub id: Option<i64>,
    pub key: String,
    pub label: String,
    pub keywords: Vec<String>,
    pub direction: Direction,
    pub score: Decimal,
    pub item_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Database ids of member items (empty for unsaved items).
    pub item_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeSummary {
    pub label: String,
    pub direction: Direction,
    pub score: Decimal,
    pub item_count: i64,
}

/// Modifiers derived from the current narratives, logged with each decision
/// and included in the LLM prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExogenousModifiers {
    /// Sum of narrative scores, clamped to [-1, 1].
    pub net_score: Decimal,
    pub bias: Bias,
    pub top_narratives: Vec<NarrativeSummary>,
}

impl ExogenousModifiers {
    pub fn neutral() -> Self {
        Self {
            net_score: Decimal::ZERO,
            bias: Bias::Neutral,
            top_narratives: Vec::new(),
        }
    }
}

type TermVector = HashMap<String, f64>;

// ---------------------------------------------------------------------------
// Text similarity
// ---------------------------------------------------------------------------

/// Lower-cased alphanumeric tokens, stop-words and short tokens removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Term-count vector for a piece of text.
pub fn bag_of_words(text: &str) -> TermVector {
    let mut v = TermVector::new();
    for token in tokenize(text) {
        *v.entry(token).or_insert(0.0) += 1.0;
    }
    v
}

/// Cosine similarity in [0, 1]; zero when either vector is empty.
pub fn cosine_similarity(a: &TermVector, b: &TermVector) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();
    let norm = |v: &TermVector| v.values().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

struct Cluster<'a> {
    centroid: TermVector,
    members: Vec<&'a ExogenousItem>,
}

pub struct ExogenousNarrativeAggregator;

impl ExogenousNarrativeAggregator {
    /// Cluster items into narratives.
    ///
    /// Items are visited in publication order; each joins the most similar
    /// cluster when similarity reaches `threshold`, otherwise seeds a new
    /// one. Output is sorted by absolute score, largest first.
    pub fn aggregate(items: &[ExogenousItem], threshold: f64, now: DateTime<Utc>) -> Vec<Narrative> {
        let mut ordered: Vec<&ExogenousItem> = items.iter().collect();
        ordered.sort_by_key(|i| i.published_at);

        let mut clusters: Vec<Cluster> = Vec::new();
        for item in ordered {
            let vector = bag_of_words(&format!("{} {}", item.title, item.summary));

            let best = clusters
                .iter()
                .enumerate()
                .map(|(idx, c)| (idx, cosine_similarity(&vector, &c.centroid)))
                .filter(|(_, sim)| *sim >= threshold && *sim > 0.0)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match best {
                Some((idx, _)) => {
                    let cluster = &mut clusters[idx];
                    for (term, n) in vector {
                        *cluster.centroid.entry(term).or_insert(0.0) += n;
                    }
                    cluster.members.push(item);
                }
                None => clusters.push(Cluster {
                    centroid: vector,
                    members: vec![item],
                }),
            }
        }

        let mut narratives: Vec<Narrative> = clusters
            .into_iter()
            .map(|c| Self::build_narrative(c, now))
            .collect();
        narratives.sort_by(|a, b| b.score.abs().cmp(&a.score.abs()).then(a.key.cmp(&b.key)));
        narratives
    }

    fn build_narrative(cluster: Cluster, now: DateTime<Utc>) -> Narrative {
        let mut terms: Vec<(&String, &f64)> = cluster.centroid.iter().collect();
        terms.sort_by(|a, b| {
            b.1.partial_cmp(a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        let keywords: Vec<String> = terms
            .iter()
            .take(KEYWORD_TERMS)
            .map(|(t, _)| (*t).clone())
            .collect();

        let label = Self::dominant_theme(&cluster.members).unwrap_or_else(|| {
            if keywords.is_empty() {
                "uncategorised".to_string()
            } else {
                keywords
                    .iter()
                    .take(LABEL_TERMS)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        });

        let score: Decimal = cluster.members.iter().map(|i| i.contribution).sum();
        let key = narrative_key(&cluster.members[0].url);

        Narrative {
            id: None,
            key,
            label,
            keywords,
            direction: direction_for(score),
            score: score.round_dp(6),
            item_count: cluster.members.len() as i64,
            first_seen: cluster.members.iter().map(|i| i.published_at).min().unwrap_or(now),
            last_seen: cluster.members.iter().map(|i| i.published_at).max().unwrap_or(now),
            updated_at: now,
            item_ids: cluster.members.iter().filter_map(|i| i.id).collect(),
        }
    }

    /// Most frequent non-empty LLM theme among members (ties: alphabetical).
    fn dominant_theme(members: &[&ExogenousItem]) -> Option<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for item in members {
            if let Some(theme) = item.theme.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                *counts.entry(theme.to_lowercase()).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(theme, _)| theme)
    }

    /// Net score, bias and the strongest narratives.
    pub fn modifiers(narratives: &[Narrative]) -> ExogenousModifiers {
        let net: Decimal = narratives.iter().map(|n| n.score).sum();
        let net_score = net.clamp(Decimal::NEGATIVE_ONE, Decimal::ONE).round_dp(4);
        let bias = if net_score > BIAS_THRESHOLD {
            Bias::RiskOn
        } else if net_score < -BIAS_THRESHOLD {
            Bias::RiskOff
        } else {
            Bias::Neutral
        };

        let mut ranked: Vec<&Narrative> = narratives.iter().collect();
        ranked.sort_by(|a, b| b.score.abs().cmp(&a.score.abs()));

        ExogenousModifiers {
            net_score,
            bias,
            top_narratives: ranked
                .into_iter()
                .take(TOP_NARRATIVES)
                .map(|n| NarrativeSummary {
                    label: n.label.clone(),
                    direction: n.direction,
                    score: n.score,
                    item_count: n.item_count,
                })
                .collect(),
        }
    }
}

/// Stable key derived from the seed item's URL (FNV-1a, 64-bit).
pub fn narrative_key(seed_url: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in seed_url.trim().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    format!("n-{hash:016x}")
}

fn direction_for(score: Decimal) -> Direction {
    if score > NEUTRAL_BAND {
        Direction::Bullish
    } else if score < -NEUTRAL_BAND {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
