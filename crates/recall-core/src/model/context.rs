use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::ProjectMetadata;

/// What a detector may look at besides the prompt itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub session_id: String,
    /// Memory tokens spent so far this session.
    pub token_count: u64,
    pub timestamp: DateTime<Utc>,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_project: Option<ProjectMetadata>,
    /// Size of the host conversation, when the host reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_tokens: Option<u64>,
    /// Highest conversation-size threshold already acted on this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_threshold: Option<u64>,
}

impl TriggerContext {
    pub fn new(session_id: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            token_count: 0,
            timestamp: Utc::now(),
            cwd: cwd.into(),
            current_project: None,
            conversation_tokens: None,
            last_threshold: None,
        }
    }

    pub fn with_project(mut self, project: ProjectMetadata) -> Self {
        self.current_project = Some(project);
        self
    }

    pub fn with_conversation_tokens(mut self, tokens: u64) -> Self {
        self.conversation_tokens = Some(tokens);
        self
    }
}
