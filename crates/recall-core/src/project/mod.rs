pub mod tracker;

pub use tracker::{format_time_ago, project_summary, ActiveProject, FileProjectTracker, ProjectTracker};
