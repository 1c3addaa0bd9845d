use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters handed to the memory query, e.g. `{query}`, `{names}`, `{project}`.
pub type QueryParams = serde_json::Map<String, Value>;

/// Which memory query a trigger asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    KeywordSearch,
    EntityDetails,
    ProjectContext,
    ThresholdCheck,
    /// Anything the engine has no route for.
    #[serde(other)]
    Unknown,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeywordSearch => "keyword_search",
            Self::EntityDetails => "entity_details",
            Self::ProjectContext => "project_context",
            Self::ThresholdCheck => "threshold_check",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detector's decision to query memory. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResult {
    pub triggered: bool,
    /// Heuristic relevance in `[0.0, 1.0]`. Logged, never used for gating.
    pub confidence: f64,
    /// Projected token cost of the query this trigger causes.
    pub estimated_tokens: u64,
    pub query_type: QueryType,
    pub query_params: QueryParams,
    pub reason: String,
}

impl TriggerResult {
    /// A fired trigger. Confidence is clamped to `[0.0, 1.0]`.
    pub fn fired(
        query_type: QueryType,
        confidence: f64,
        estimated_tokens: u64,
        query_params: QueryParams,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            triggered: true,
            confidence: confidence.clamp(0.0, 1.0),
            estimated_tokens,
            query_type,
            query_params,
            reason: reason.into(),
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).and_then(Value::as_str)
    }

    /// A string-array parameter; non-string elements are skipped.
    pub fn param_strings(&self, key: &str) -> Vec<String> {
        self.query_params
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.query_params.get(key).and_then(Value::as_u64)
    }
}

impl fmt::Display for TriggerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TriggerResult(triggered={}, confidence={:.2}, tokens={}, type={}, reason='{}')",
            self.triggered, self.confidence, self.estimated_tokens, self.query_type, self.reason
        )
    }
}
