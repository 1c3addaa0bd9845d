//! Client for the knowledge-graph memory store that backs Recall.
//!
//! The store holds entities (a name, a type and free-text observations) and typed
//! relations between them. [`MemoryClient`] wraps any [`MemoryBackend`] with an
//! availability cache, per-call timeouts and bounded retry, so callers only ever
//! see "a result" or "nothing".

pub mod backend;
pub mod client;
pub mod error;
pub mod graph;
pub mod settings;

pub use backend::{JsonlGraphBackend, MemoryBackend};
pub use client::{estimate_tokens, MemoryClient, AVAILABILITY_TTL, DEFAULT_SEARCH_LIMIT};
pub use error::MemoryError;
pub use graph::{Entity, KnowledgeGraph, ObservationInput, ObservationResult, Relation};
pub use settings::McpSettings;
