//! Trigger engine for Recall.
//!
//! On every user prompt the [`TriggerEngine`] asks its detectors, in priority
//! order, whether the prompt warrants pulling context from the knowledge-graph
//! memory. The first trigger that fits the session's token budget wins; its
//! query runs through [`recall_memory::MemoryClient`] and the cost is charged
//! to session state persisted between invocations.

pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod model;
pub mod project;
pub mod session;
mod storage;

pub use config::{BudgetSettings, DetectorSettings, EngineConfig, EnginePaths, LoggingSettings};
pub use detectors::{Detector, DetectorKind, DetectorRegistry};
pub use engine::{EngineStats, PlannedQuery, TriggerEngine, PENDING_WORK_QUERY};
pub use error::CoreError;
pub use model::{ProjectMetadata, QueryParams, QueryType, TriggerContext, TriggerResult};
pub use project::{ActiveProject, FileProjectTracker, ProjectTracker};
pub use session::{EngineState, TriggerRecord};
