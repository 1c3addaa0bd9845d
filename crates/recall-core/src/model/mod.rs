pub mod context;
pub mod project;
pub mod trigger;

pub use context::TriggerContext;
pub use project::{normalize_remote_url, remotes_match, shorten_remote_url, ProjectMetadata};
pub use trigger::{QueryParams, QueryType, TriggerResult};
