use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_memory::{
    JsonlGraphBackend, KnowledgeGraph, MemoryBackend, MemoryClient, DEFAULT_SEARCH_LIMIT,
};
use serde::Serialize;

use crate::config::{EngineConfig, EnginePaths};
use crate::detectors::{Detector, DetectorDeps, DetectorKind, DetectorRegistry};
use crate::model::{ProjectMetadata, QueryType, TriggerContext, TriggerResult};
use crate::project::FileProjectTracker;
use crate::session::EngineState;

/// Search used for `threshold_check` triggers.
pub const PENDING_WORK_QUERY: &str = "status:pending OR status:incomplete";

const MAX_FORMATTED_ENTITIES: usize = 5;
const MAX_FORMATTED_OBSERVATIONS: usize = 3;

/// The memory call a trigger maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedQuery {
    Search(String),
    Open(Vec<String>),
}

impl PlannedQuery {
    /// Route a trigger to its memory call. `None` for query types with no route.
    pub fn for_trigger(trigger: &TriggerResult) -> Option<Self> {
        match trigger.query_type {
            QueryType::KeywordSearch => Some(Self::Search(
                trigger.param_str("query").unwrap_or_default().to_string(),
            )),
            QueryType::EntityDetails => Some(Self::Open(trigger.param_strings("names"))),
            QueryType::ProjectContext => Some(Self::Search(format!(
                "project:{}",
                trigger.param_str("project").unwrap_or_default()
            ))),
            QueryType::ThresholdCheck => Some(Self::Search(PENDING_WORK_QUERY.to_string())),
            QueryType::Unknown => None,
        }
    }
}

impl fmt::Display for PlannedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search(query) => write!(f, "search_nodes({query:?})"),
            Self::Open(names) => write!(f, "open_nodes({names:?})"),
        }
    }
}

/// Read-only snapshot of the session for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub session_id: String,
    pub session_start: DateTime<Utc>,
    pub tokens_used: u64,
    pub tokens_budget: u64,
    pub tokens_remaining: u64,
    pub triggers_fired: usize,
    pub detectors_registered: usize,
    pub detectors_enabled: usize,
}

/// Runs detectors in priority order, enforces the token budget, queries
/// memory for the winning trigger and keeps session state on disk.
///
/// One engine serves one prompt: state is loaded at construction and saved
/// after every recorded trigger.
pub struct TriggerEngine {
    paths: EnginePaths,
    config: EngineConfig,
    state: EngineState,
    registry: DetectorRegistry,
    memory: Arc<MemoryClient>,
}

impl fmt::Debug for TriggerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerEngine")
            .field("paths", &self.paths)
            .field("session_id", &self.state.session_id)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TriggerEngine {
    /// Load config from `paths.config` (defaults on any failure) and build the engine.
    pub fn new(paths: EnginePaths) -> Self {
        let config = EngineConfig::load_or_default(&paths.config);
        Self::with_config(paths, config)
    }

    /// Build with an explicit config, backed by the JSONL graph file it names.
    pub fn with_config(paths: EnginePaths, config: EngineConfig) -> Self {
        let memory_file = paths.memory_file(&config.mcp);
        let backend: Arc<dyn MemoryBackend> = Arc::new(JsonlGraphBackend::new(memory_file));
        let memory = Arc::new(MemoryClient::new(backend, config.mcp.clone()));
        Self::with_memory(paths, config, memory)
    }

    /// Build around an existing memory client.
    pub fn with_memory(paths: EnginePaths, config: EngineConfig, memory: Arc<MemoryClient>) -> Self {
        let state = EngineState::load(&paths.state);
        let mut engine = Self {
            paths,
            config,
            state,
            registry: DetectorRegistry::new(),
            memory,
        };
        engine.register_configured();
        tracing::info!(
            session_id = %engine.state.session_id,
            detectors = ?engine.registry.names(),
            "Memory trigger engine initialized"
        );
        engine
    }

    /// Register every detector whose config section says `enabled: true`.
    /// A detector that fails to build is skipped.
    fn register_configured(&mut self) {
        let deps = DetectorDeps {
            memory: Arc::clone(&self.memory),
            tracker: Arc::new(FileProjectTracker::new(&self.paths.active_project)),
        };
        for key in self.config.detectors.keys() {
            if DetectorKind::from_config_key(key).is_none() {
                tracing::warn!(detector = %key, "Unknown detector in config, ignoring");
            }
        }
        for kind in DetectorKind::ALL {
            let Some(settings) = self.config.detector(kind.config_key()) else {
                continue;
            };
            if !settings.wants_registration() {
                continue;
            }
            match kind.build(settings, &deps) {
                Ok(detector) => self.registry.register(detector),
                Err(e) => {
                    tracing::warn!(detector = kind.config_key(), "Skipping detector: {e}");
                }
            }
        }
    }

    /// Add a detector, replacing any with the same name.
    pub fn register_detector(&mut self, detector: Box<dyn Detector>) {
        self.registry.register(detector);
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    pub fn memory(&self) -> &MemoryClient {
        &self.memory
    }

    /// Context for a prompt issued from `cwd`, filled from session state.
    pub fn build_context(&self, cwd: &Path) -> TriggerContext {
        let mut context = TriggerContext::new(self.state.session_id.clone(), cwd)
            .with_project(ProjectMetadata::collect(cwd));
        context.token_count = self.state.tokens_used;
        context.last_threshold = self.state.last_threshold;
        context
    }

    fn within_session_budget(&self, extra: u64) -> bool {
        self.state.tokens_used.saturating_add(extra) <= self.config.budget.max_tokens_per_session
    }

    /// First enabled detector, by priority, whose trigger fits the budget.
    ///
    /// A detector that errors or panics counts as "no trigger" and evaluation
    /// moves on to the next one.
    pub fn evaluate_triggers(
        &self,
        prompt: &str,
        context: Option<&TriggerContext>,
    ) -> Option<TriggerResult> {
        let preview: String = prompt.chars().take(50).collect();
        tracing::debug!("Evaluating triggers for prompt: {preview}...");

        let built;
        let context = match context {
            Some(context) => context,
            None => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
                built = self.build_context(&cwd);
                &built
            }
        };

        let budget = &self.config.budget;
        if self.state.tokens_used >= budget.max_tokens_per_session {
            tracing::warn!(
                "Token budget exhausted ({}/{})",
                self.state.tokens_used,
                budget.max_tokens_per_session
            );
            return None;
        }

        for detector in self.registry.enabled_detectors() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| detector.evaluate(prompt, context)));
            let result = match outcome {
                Ok(Ok(Some(result))) if result.triggered => result,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    tracing::error!(detector = detector.name(), "Detector failed: {e}");
                    continue;
                }
                Err(payload) => {
                    tracing::error!(
                        detector = detector.name(),
                        "Detector panicked: {}",
                        panic_message(payload.as_ref())
                    );
                    continue;
                }
            };

            if result.estimated_tokens > budget.max_tokens_per_trigger
                || !self.within_session_budget(result.estimated_tokens)
            {
                tracing::warn!(
                    detector = detector.name(),
                    estimated_tokens = result.estimated_tokens,
                    "Trigger would exceed budget, skipping"
                );
                continue;
            }

            tracing::info!(
                detector = detector.name(),
                "Trigger fired: {} (confidence: {:.2})",
                result.query_type,
                result.confidence
            );
            return Some(result);
        }

        tracing::debug!("No triggers fired");
        None
    }

    /// Run the memory query for `trigger` and charge its actual cost to the session.
    ///
    /// Returns `None` when the store is unavailable, the query type has no
    /// route, or the query fails.
    pub fn query_memory(&mut self, trigger: &TriggerResult) -> Option<KnowledgeGraph> {
        tracing::debug!("Querying memory: {}", trigger.query_type);

        let Some(planned) = PlannedQuery::for_trigger(trigger) else {
            tracing::warn!("Unknown query type: {}", trigger.query_type);
            return None;
        };
        if !self.memory.is_available() {
            tracing::warn!("Memory store unavailable");
            return None;
        }

        let result = match &planned {
            PlannedQuery::Search(query) => self.memory.search_nodes(query, DEFAULT_SEARCH_LIMIT),
            PlannedQuery::Open(names) => self.memory.open_nodes(names),
        };
        let Some(graph) = result else {
            tracing::warn!("Memory query returned no results: {planned}");
            return None;
        };

        let tokens = self.memory.estimate_tokens(Some(&graph));
        self.record_trigger(trigger, tokens);
        tracing::info!(
            entities = graph.entities.len(),
            tokens,
            "Memory query returned results"
        );
        Some(graph)
    }

    /// Append to the trigger log, charge `tokens`, and persist.
    pub(crate) fn record_trigger(&mut self, trigger: &TriggerResult, tokens: u64) {
        self.state
            .record(trigger.query_type, tokens, trigger.reason.clone());
        if trigger.query_type == QueryType::ThresholdCheck {
            if let Some(threshold) = trigger.param_u64("threshold") {
                self.state.last_threshold = self.state.last_threshold.max(Some(threshold));
            }
        }
        if let Err(e) = self.state.save(&self.paths.state) {
            tracing::warn!("Failed to save state: {e}");
        }
    }

    /// Render memory for display: up to 5 entities with up to 3 observations each.
    pub fn format_result(trigger: &TriggerResult, memory: Option<&KnowledgeGraph>) -> String {
        let label = trigger.query_type.as_str().to_uppercase();
        let Some(graph) = memory.filter(|g| !g.entities.is_empty()) else {
            return format!("[{label}] No relevant memory found");
        };

        let mut lines = vec![
            format!("[{label} TRIGGER]"),
            format!("Reason: {}", trigger.reason),
            String::new(),
            "Relevant Memory:".to_string(),
        ];
        for entity in graph.entities.iter().take(MAX_FORMATTED_ENTITIES) {
            lines.push(format!("\n- [{}] {}", entity.entity_type, entity.name));
            for observation in entity.observations.iter().take(MAX_FORMATTED_OBSERVATIONS) {
                lines.push(format!("  • {observation}"));
            }
        }
        lines.push(format!("\n[Token cost: ~{}]", trigger.estimated_tokens));
        lines.join("\n")
    }

    pub fn stats(&self) -> EngineStats {
        let budget = self.config.budget.max_tokens_per_session;
        EngineStats {
            session_id: self.state.session_id.clone(),
            session_start: self.state.session_start,
            tokens_used: self.state.tokens_used,
            tokens_budget: budget,
            tokens_remaining: budget.saturating_sub(self.state.tokens_used),
            triggers_fired: self.state.triggers_fired.len(),
            detectors_registered: self.registry.len(),
            detectors_enabled: self.registry.enabled_detectors().count(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
