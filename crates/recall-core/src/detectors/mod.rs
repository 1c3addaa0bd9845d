//! Trigger detectors and the table that builds them from config.

pub mod entity_mention;
pub mod keyword;
pub mod project_switch;
pub mod registry;
pub mod token_threshold;

use std::sync::Arc;

use recall_memory::MemoryClient;

use crate::config::DetectorSettings;
use crate::error::CoreError;
use crate::model::{TriggerContext, TriggerResult};
use crate::project::ProjectTracker;

pub use entity_mention::EntityMentionDetector;
pub use keyword::{KeywordCategory, KeywordDetector};
pub use project_switch::ProjectSwitchDetector;
pub use registry::DetectorRegistry;
pub use token_threshold::TokenThresholdDetector;

/// Priority given to a detector whose config section has none.
pub const DEFAULT_PRIORITY: i32 = 999;

/// A strategy that inspects a prompt and its context and may propose a trigger.
///
/// Lower `priority` runs first. An `Err` (or a panic) from `evaluate` is treated
/// by the engine as "no trigger from this detector".
pub trait Detector: Send + Sync {
    /// Unique registry key, e.g. `keyword_detector`.
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn is_enabled(&self) -> bool;

    fn evaluate(
        &self,
        prompt: &str,
        context: &TriggerContext,
    ) -> Result<Option<TriggerResult>, CoreError>;
}

/// Collaborators a detector may need at construction time.
#[derive(Clone)]
pub struct DetectorDeps {
    pub memory: Arc<MemoryClient>,
    pub tracker: Arc<dyn ProjectTracker>,
}

/// The detectors the engine knows how to build, keyed by config section name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    ProjectSwitch,
    Keyword,
    EntityMention,
    TokenThreshold,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::ProjectSwitch,
        DetectorKind::Keyword,
        DetectorKind::EntityMention,
        DetectorKind::TokenThreshold,
    ];

    pub fn config_key(&self) -> &'static str {
        match self {
            Self::ProjectSwitch => "project_switch",
            Self::Keyword => "keyword",
            Self::EntityMention => "entity_mention",
            Self::TokenThreshold => "token_threshold",
        }
    }

    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.config_key() == key)
    }

    /// Construct the detector from its config section.
    pub fn build(
        &self,
        settings: &DetectorSettings,
        deps: &DetectorDeps,
    ) -> Result<Box<dyn Detector>, CoreError> {
        Ok(match self {
            Self::ProjectSwitch => Box::new(ProjectSwitchDetector::new(
                settings,
                Arc::clone(&deps.tracker),
            )?),
            Self::Keyword => Box::new(KeywordDetector::new(settings)?),
            Self::EntityMention => Box::new(EntityMentionDetector::new(
                settings,
                Arc::clone(&deps.memory),
            )?),
            Self::TokenThreshold => Box::new(TokenThresholdDetector::new(settings)?),
        })
    }
}

/// `(enabled, priority)` for a detector section, with the shared defaults.
pub(crate) fn identity(settings: &DetectorSettings) -> (bool, i32) {
    (
        settings.is_enabled(),
        settings.priority.unwrap_or(DEFAULT_PRIORITY),
    )
}
