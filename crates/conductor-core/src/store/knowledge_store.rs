use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ConductorError;
use crate::models::insight::LearningInsight;
use crate::storage::{self, DurableStorage, KeyedLocks};

const PREFIX: &str = "insights/";

/// Weight of the query/topic overlap in the composite score.
pub const TOPIC_WEIGHT: f64 = 0.5;
/// Weight of the insight's own confidence.
pub const CONFIDENCE_WEIGHT: f64 = 0.3;
/// Weight of the recency decay.
pub const RECENCY_WEIGHT: f64 = 0.2;

pub const DEFAULT_HALF_LIFE_HOURS: f64 = 168.0;

/// An insight paired with its composite relevance score for one query.
#[derive(Debug, Clone)]
pub struct ScoredInsight {
    pub insight: LearningInsight,
    pub score: f64,
}

/// Append-only store of learning insights with relevance ranking.
///
/// Score = `0.5 * topic_overlap + 0.3 * confidence + 0.2 * recency_decay`,
/// where `recency_decay` halves every `half_life_hours`. Ties go to the most
/// recent insight. Insights are never edited; a correction is a new insight
/// that `supersedes` the old one, which then drops out of query results.
#[derive(Clone)]
pub struct KnowledgeRepository {
    storage: Arc<dyn DurableStorage>,
    locks: KeyedLocks,
    half_life_hours: f64,
}

impl KnowledgeRepository {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self::with_half_life(storage, DEFAULT_HALF_LIFE_HOURS)
    }

    pub fn with_half_life(storage: Arc<dyn DurableStorage>, half_life_hours: f64) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
            half_life_hours: if half_life_hours > 0.0 {
                half_life_hours
            } else {
                DEFAULT_HALF_LIFE_HOURS
            },
        }
    }

    pub async fn record(&self, insight: &LearningInsight) -> Result<(), ConductorError> {
        if !insight.confidence.is_finite() || !(0.0..=1.0).contains(&insight.confidence) {
            return Err(ConductorError::permanent(format!(
                "Insight confidence must be within [0, 1], got {}",
                insight.confidence
            )));
        }
        if insight.id.is_empty() || insight.id.contains('/') {
            return Err(ConductorError::permanent(format!("Invalid insight id: '{}'", insight.id)));
        }

        let key = insight_key(&insight.id);
        let _guard = self.locks.lock(&insight.id).await;
        if self.storage.get(&key).await?.is_some() {
            return Err(ConductorError::permanent(format!(
                "Insight {} already recorded; record a superseding insight instead",
                insight.id
            )));
        }
        storage::put_json(self.storage.as_ref(), &key, insight).await?;
        tracing::debug!(
            "[Knowledge] Recorded insight {} (topics: {:?})",
            insight.id,
            insight.topics
        );
        Ok(())
    }

    pub async fn get(&self, insight_id: &str) -> Result<LearningInsight, ConductorError> {
        storage::get_json(self.storage.as_ref(), &insight_key(insight_id))
            .await?
            .ok_or_else(|| ConductorError::not_found(format!("Insight not found: {}", insight_id)))
    }

    /// Up to `limit` insights, best first.
    pub async fn query(&self, topic: &str, limit: usize) -> Result<Vec<LearningInsight>, ConductorError> {
        Ok(self
            .query_scored(topic, limit)
            .await?
            .into_iter()
            .map(|s| s.insight)
            .collect())
    }

    pub async fn query_scored(&self, topic: &str, limit: usize) -> Result<Vec<ScoredInsight>, ConductorError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let insights: Vec<LearningInsight> = storage::list_json(self.storage.as_ref(), PREFIX).await?;
        let superseded: HashSet<&str> = insights
            .iter()
            .filter_map(|i| i.supersedes.as_deref())
            .collect();

        let query_tokens = tokenize(topic);
        let now = Utc::now();
        let mut scored: Vec<ScoredInsight> = insights
            .iter()
            .filter(|i| !superseded.contains(i.id.as_str()))
            .map(|i| ScoredInsight {
                score: composite_score(i, &query_tokens, now, self.half_life_hours),
                insight: i.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.insight.created_at.cmp(&a.insight.created_at))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Pure relevance score of `insight` for a tokenized query at time `now`.
pub fn composite_score(
    insight: &LearningInsight,
    query_tokens: &HashSet<String>,
    now: DateTime<Utc>,
    half_life_hours: f64,
) -> f64 {
    TOPIC_WEIGHT * topic_overlap(insight, query_tokens)
        + CONFIDENCE_WEIGHT * insight.confidence.clamp(0.0, 1.0)
        + RECENCY_WEIGHT * recency_decay(insight.created_at, now, half_life_hours)
}

/// Fraction of query tokens found among the insight's topic tokens.
fn topic_overlap(insight: &LearningInsight, query_tokens: &HashSet<String>) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let topic_tokens: HashSet<String> = insight.topics.iter().flat_map(|t| tokenize(t)).collect();
    let shared = query_tokens.intersection(&topic_tokens).count();
    shared as f64 / query_tokens.len() as f64
}

fn recency_decay(created_at: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f64) -> f64 {
    let age_hours = (now - created_at).num_seconds().max(0) as f64 / 3600.0;
    0.5_f64.powf(age_hours / half_life_hours)
}

pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn insight_key(insight_id: &str) -> String {
    format!("{}{}", PREFIX, insight_id)
}
