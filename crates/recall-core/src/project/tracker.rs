use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{Repository, StatusOptions};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{shorten_remote_url, ProjectMetadata};
use crate::storage;

/// The last project observed, as stored in `active-project.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveProject {
    pub project: ProjectMetadata,
    #[serde(default)]
    pub has_uncommitted_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Remembers which project was active on the previous prompt.
pub trait ProjectTracker: Send + Sync {
    /// The previously observed project, or `None` before the first observation.
    fn get_active_project(&self) -> Result<Option<ActiveProject>, CoreError>;

    /// Record `project` as the one now active.
    fn set_active_project(
        &self,
        project: &ProjectMetadata,
        has_uncommitted_changes: bool,
        last_checkpoint: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    /// Whether the work tree at `path` has staged, unstaged or untracked changes.
    fn has_uncommitted_changes(&self, path: &Path) -> bool;
}

/// [`ProjectTracker`] backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileProjectTracker {
    path: PathBuf,
}

impl FileProjectTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget the active project. A missing file is not an error.
    pub fn clear_active_project(&self) -> Result<(), CoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self) -> Result<ActiveProject, CoreError> {
        let data = storage::read_locked(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

impl ProjectTracker for FileProjectTracker {
    fn get_active_project(&self) -> Result<Option<ActiveProject>, CoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        match self.read() {
            Ok(active) => Ok(Some(active)),
            Err(e) => {
                // A damaged file is treated like a first run.
                tracing::warn!("Could not load active project state: {e}");
                Ok(None)
            }
        }
    }

    fn set_active_project(
        &self,
        project: &ProjectMetadata,
        has_uncommitted_changes: bool,
        last_checkpoint: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let now = Utc::now();
        let state = ActiveProject {
            project: project.clone(),
            has_uncommitted_changes,
            last_checkpoint: Some(last_checkpoint.unwrap_or(now)),
            updated_at: now,
        };
        let json = serde_json::to_string_pretty(&state)?;
        storage::write_locked(&self.path, json.as_bytes())
            .map_err(|e| CoreError::Tracker(format!("{}: {e}", self.path.display())))
    }

    fn has_uncommitted_changes(&self, path: &Path) -> bool {
        match work_tree_status(path) {
            Ok(dirty) => dirty,
            Err(e) => {
                tracing::debug!("git status failed for {}: {e}", path.display());
                false
            }
        }
    }
}

/// Whether the repository enclosing `path` has staged, unstaged or untracked changes.
fn work_tree_status(path: &Path) -> Result<bool, CoreError> {
    let repo = Repository::discover(path)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).include_ignored(false);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

/// One-line description, e.g. `billing (github.com/acme/billing, branch: main)`.
pub fn project_summary(project: &ProjectMetadata) -> String {
    let location = match project.remote() {
        Some(remote) => shorten_remote_url(remote),
        None => project.absolute_path.display().to_string(),
    };
    let branch = project.branch().unwrap_or("unknown");
    format!("{} ({location}, branch: {branch})", project.name)
}

/// Relative time such as `just now`, `1 minute ago` or `3 days ago`.
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);
    let (count, unit) = match seconds {
        s if s < 60 => return "just now".to_string(),
        s if s < 3600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3600, "hour"),
        s => (s / 86_400, "day"),
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {unit}{plural} ago")
}
