use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::QueryType;
use crate::storage;

/// One fired trigger, as recorded in the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub timestamp: DateTime<Utc>,
    /// The query type that fired, e.g. `keyword_search`.
    pub detector: QueryType,
    pub tokens: u64,
    pub reason: String,
}

/// Per-session engine state. The state file is its only persistence.
///
/// `tokens_used` always equals the sum of `tokens` over `triggers_fired`;
/// [`EngineState::record`] is the only way either changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub session_id: String,
    pub session_start: DateTime<Utc>,
    pub tokens_used: u64,
    #[serde(default)]
    pub triggers_fired: Vec<TriggerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_threshold: Option<u64>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::fresh()
    }
}

impl EngineState {
    /// A new session with a freshly generated id.
    pub fn fresh() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            session_start: Utc::now(),
            tokens_used: 0,
            triggers_fired: Vec::new(),
            last_threshold: None,
        }
    }

    /// Load state from `path`. A missing or unreadable file starts a fresh session.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::fresh();
        }
        match Self::read(path) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Failed to load state, starting fresh: {e}");
                Self::fresh()
            }
        }
    }

    fn read(path: &Path) -> Result<Self, CoreError> {
        let data = storage::read_locked(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Overwrite the state file with the full state, under an exclusive lock.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(self)?;
        storage::write_locked(path, json.as_bytes())?;
        Ok(())
    }

    /// Append a fired trigger and charge its tokens to the session.
    pub fn record(&mut self, detector: QueryType, tokens: u64, reason: impl Into<String>) {
        self.triggers_fired.push(TriggerRecord {
            timestamp: Utc::now(),
            detector,
            tokens,
            reason: reason.into(),
        });
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_starts_fresh_session() {
        let tmp = TempDir::new().unwrap();
        let state = EngineState::load(&tmp.path().join("state.json"));
        assert_eq!(state.tokens_used, 0);
        assert!(state.triggers_fired.is_empty());
        assert!(Uuid::parse_str(&state.session_id).is_ok());
    }

    #[test]
    fn test_corrupt_file_starts_fresh_session() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(&path, "tokens_used=12").unwrap();
        let state = EngineState::load(&path);
        assert_eq!(state.tokens_used, 0);
    }

    #[test]
    fn test_record_save_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".claude").join("state.json");

        let mut state = EngineState::fresh();
        state.record(QueryType::KeywordSearch, 120, "Keyword match: category=memory");
        state.record(QueryType::ProjectContext, 80, "Switched projects: a → b");
        state.save(&path).unwrap();

        let loaded = EngineState::load(&path);
        assert_eq!(loaded, state);
        assert_eq!(loaded.tokens_used, 200);
        let total: u64 = loaded.triggers_fired.iter().map(|t| t.tokens).sum();
        assert_eq!(total, loaded.tokens_used);
        assert_eq!(loaded.triggers_fired[1].detector, QueryType::ProjectContext);
    }

    #[test]
    fn test_state_file_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let mut state = EngineState::fresh();
        state.record(QueryType::KeywordSearch, 42, "why");
        state.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["tokens_used"], 42);
        assert_eq!(raw["triggers_fired"][0]["detector"], "keyword_search");
        assert!(raw.get("last_threshold").is_none());
    }

    #[test]
    fn test_state_without_threshold_field_loads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(
            &path,
            r#"{"session_id": "abc", "session_start": "2024-05-01T10:00:00Z",
                "tokens_used": 0, "triggers_fired": []}"#,
        )
        .unwrap();
        let state = EngineState::load(&path);
        assert_eq!(state.session_id, "abc");
        assert!(state.last_threshold.is_none());
    }

    #[test]
    fn test_save_over_longer_state_leaves_valid_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let mut long = EngineState::fresh();
        for _ in 0..20 {
            long.record(QueryType::KeywordSearch, 10, "Keyword match: category=memory");
        }
        long.save(&path).unwrap();

        let short = EngineState::fresh();
        short.save(&path).unwrap();
        assert_eq!(EngineState::load(&path), short);
    }
}
