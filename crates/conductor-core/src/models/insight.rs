use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearningInsight {
    pub id: String,
    /// Event that produced the insight, e.g. `coordination:<session-id>`.
    pub source_event: String,
    pub topics: Vec<String>,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub content: String,
    /// Id of an earlier insight this one corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LearningInsight {
    pub fn new(
        source_event: impl Into<String>,
        topics: Vec<String>,
        confidence: f64,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_event: source_event.into(),
            topics,
            confidence: confidence.clamp(0.0, 1.0),
            content: content.into(),
            supersedes: None,
            created_at: Utc::now(),
        }
    }

    pub fn superseding(mut self, insight_id: impl Into<String>) -> Self {
        self.supersedes = Some(insight_id.into());
        self
    }
}
