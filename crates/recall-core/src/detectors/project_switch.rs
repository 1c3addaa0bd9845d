use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use super::{identity, Detector};
use crate::config::DetectorSettings;
use crate::error::CoreError;
use crate::model::{
    remotes_match, shorten_remote_url, ProjectMetadata, QueryParams, QueryType, TriggerContext,
    TriggerResult,
};
use crate::project::ProjectTracker;

const NAME: &str = "project_switch_detector";
const ESTIMATED_TOKENS: u64 = 200;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ProjectSwitchOptions {
    detect_branch_switch: bool,
    major_branches: Vec<String>,
}

impl Default for ProjectSwitchOptions {
    fn default() -> Self {
        Self {
            detect_branch_switch: true,
            major_branches: ["main", "master", "develop", "development"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchType {
    Directory,
    Remote,
    Branch,
}

impl SwitchType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Remote => "remote",
            Self::Branch => "branch",
        }
    }
}

/// Fires when the user moves to another project, remote, or major branch.
///
/// Only `context.current_project` is inspected; the prompt text is ignored.
pub struct ProjectSwitchDetector {
    enabled: bool,
    priority: i32,
    detect_branch_switch: bool,
    major_branches: Vec<String>,
    tracker: Arc<dyn ProjectTracker>,
}

impl std::fmt::Debug for ProjectSwitchDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectSwitchDetector")
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("detect_branch_switch", &self.detect_branch_switch)
            .field("major_branches", &self.major_branches)
            .finish_non_exhaustive()
    }
}

impl ProjectSwitchDetector {
    pub fn new(
        settings: &DetectorSettings,
        tracker: Arc<dyn ProjectTracker>,
    ) -> Result<Self, CoreError> {
        let (enabled, priority) = identity(settings);
        let options: ProjectSwitchOptions = settings.parse_options()?;
        Ok(Self {
            enabled,
            priority,
            detect_branch_switch: options.detect_branch_switch,
            major_branches: options.major_branches,
            tracker,
        })
    }

    fn is_major(&self, branch: Option<&str>) -> bool {
        branch.is_some_and(|b| self.major_branches.iter().any(|m| m == b))
    }

    /// Directory, then remote, then branch; the first difference decides.
    fn classify(
        &self,
        previous: &ProjectMetadata,
        current: &ProjectMetadata,
    ) -> Option<(SwitchType, f64, String)> {
        if previous.absolute_path != current.absolute_path {
            let confidence = if current.remote().is_some() { 1.0 } else { 0.95 };
            let reason = format!("Switched projects: {} → {}", previous.name, current.name);
            return Some((SwitchType::Directory, confidence, reason));
        }

        if !remotes_match(previous.remote(), current.remote()) {
            let reason = format!(
                "Changed git remote: {} → {}",
                previous.remote().map(shorten_remote_url).unwrap_or_else(|| "none".into()),
                current.remote().map(shorten_remote_url).unwrap_or_else(|| "none".into()),
            );
            return Some((SwitchType::Remote, 0.90, reason));
        }

        let (old_branch, new_branch) = (previous.branch(), current.branch());
        if self.detect_branch_switch
            && old_branch != new_branch
            && (self.is_major(old_branch) || self.is_major(new_branch))
        {
            let reason = format!(
                "Switched branch in {}: {} → {}",
                current.name,
                old_branch.unwrap_or("unknown"),
                new_branch.unwrap_or("unknown"),
            );
            return Some((SwitchType::Branch, 0.75, reason));
        }
        None
    }

    fn observe(&self, current: &ProjectMetadata) -> Result<Option<TriggerResult>, CoreError> {
        let previous = self.tracker.get_active_project()?;
        let switch = previous
            .as_ref()
            .and_then(|active| self.classify(&active.project, current));

        // The tracker always reflects the last observed project.
        let dirty = self.tracker.has_uncommitted_changes(&current.absolute_path);
        self.tracker
            .set_active_project(current, dirty, Some(Utc::now()))?;

        let Some((switch_type, confidence, reason)) = switch else {
            return Ok(None);
        };

        let mut params = QueryParams::new();
        params.insert("project".into(), Value::String(current.name.clone()));
        params.insert(
            "project_path".into(),
            Value::String(current.absolute_path.display().to_string()),
        );
        params.insert(
            "git_remote".into(),
            current.remote().map_or(Value::Null, |r| Value::String(r.into())),
        );
        params.insert(
            "branch".into(),
            current.branch().map_or(Value::Null, |b| Value::String(b.into())),
        );
        params.insert("switch_type".into(), Value::String(switch_type.as_str().into()));

        tracing::info!(switch_type = switch_type.as_str(), "{reason}");
        Ok(Some(TriggerResult::fired(
            QueryType::ProjectContext,
            confidence,
            ESTIMATED_TOKENS,
            params,
            reason,
        )))
    }
}

impl Detector for ProjectSwitchDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn evaluate(
        &self,
        _prompt: &str,
        context: &TriggerContext,
    ) -> Result<Option<TriggerResult>, CoreError> {
        let Some(current) = &context.current_project else {
            return Ok(None);
        };
        match self.observe(current) {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!("Project tracker unavailable, skipping switch check: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use chrono::DateTime;
    use serde_json::json;

    use crate::project::ActiveProject;

    #[derive(Default)]
    struct StubTracker {
        active: Mutex<Option<ActiveProject>>,
        dirty: bool,
        broken: bool,
    }

    impl ProjectTracker for StubTracker {
        fn get_active_project(&self) -> Result<Option<ActiveProject>, CoreError> {
            if self.broken {
                return Err(CoreError::Tracker("disk on fire".into()));
            }
            Ok(self.active.lock().unwrap().clone())
        }

        fn set_active_project(
            &self,
            project: &ProjectMetadata,
            has_uncommitted_changes: bool,
            last_checkpoint: Option<DateTime<Utc>>,
        ) -> Result<(), CoreError> {
            *self.active.lock().unwrap() = Some(ActiveProject {
                project: project.clone(),
                has_uncommitted_changes,
                last_checkpoint,
                updated_at: Utc::now(),
            });
            Ok(())
        }

        fn has_uncommitted_changes(&self, _path: &Path) -> bool {
            self.dirty
        }
    }

    fn project(path: &str, remote: Option<&str>, branch: &str) -> ProjectMetadata {
        ProjectMetadata {
            name: Path::new(path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string(),
            absolute_path: PathBuf::from(path),
            git_remote_url: remote.map(String::from),
            git_branch: Some(branch.to_string()),
        }
    }

    fn detector_with(settings: DetectorSettings) -> (ProjectSwitchDetector, Arc<StubTracker>) {
        let tracker = Arc::new(StubTracker::default());
        let detector = ProjectSwitchDetector::new(&settings, tracker.clone()).unwrap();
        (detector, tracker)
    }

    fn detector() -> (ProjectSwitchDetector, Arc<StubTracker>) {
        detector_with(DetectorSettings::enabled_at(1))
    }

    fn observe(detector: &ProjectSwitchDetector, project: ProjectMetadata) -> Option<TriggerResult> {
        let ctx = TriggerContext::new("s1", &project.absolute_path).with_project(project);
        detector.evaluate("anything", &ctx).unwrap()
    }

    #[test]
    fn test_no_project_in_context() {
        let (detector, tracker) = detector();
        let ctx = TriggerContext::new("s1", "/tmp");
        assert!(detector.evaluate("hello there", &ctx).unwrap().is_none());
        assert!(tracker.active.lock().unwrap().is_none());
    }

    #[test]
    fn test_first_observation_records_without_trigger() {
        let (detector, tracker) = detector();
        let api = project("/work/api", Some("https://github.com/acme/api.git"), "main");
        assert!(observe(&detector, api.clone()).is_none());
        assert_eq!(tracker.active.lock().unwrap().as_ref().unwrap().project, api);
    }

    #[test]
    fn test_directory_switch() {
        let (detector, tracker) = detector();
        observe(&detector, project("/work/api", None, "main"));

        let web = project("/work/web", Some("git@github.com:acme/web.git"), "main");
        let result = observe(&detector, web.clone()).unwrap();
        assert_eq!(result.query_type, QueryType::ProjectContext);
        assert_eq!(result.estimated_tokens, 200);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.reason, "Switched projects: api → web");
        assert_eq!(result.param_str("switch_type"), Some("directory"));
        assert_eq!(result.param_str("project"), Some("web"));
        assert_eq!(result.param_str("project_path"), Some("/work/web"));
        assert_eq!(result.param_str("git_remote"), Some("git@github.com:acme/web.git"));
        assert_eq!(result.param_str("branch"), Some("main"));
        assert_eq!(tracker.active.lock().unwrap().as_ref().unwrap().project, web);

        let local = observe(&detector, project("/work/scratch", None, "main")).unwrap();
        assert!((local.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_remote_switch_ignores_normalization_noise() {
        let (detector, _) = detector();
        observe(&detector, project("/work/api", Some("https://github.com/acme/api.git"), "main"));
        assert!(observe(&detector, project("/work/api", Some("http://github.com/acme/api"), "main")).is_none());

        let result =
            observe(&detector, project("/work/api", Some("https://github.com/acme/api-v2"), "main"))
                .unwrap();
        assert_eq!(result.param_str("switch_type"), Some("remote"));
        assert!((result.confidence - 0.90).abs() < 1e-9);
        assert_eq!(
            result.reason,
            "Changed git remote: github.com/acme/api → github.com/acme/api-v2"
        );
    }

    #[test]
    fn test_branch_switch_needs_a_major_branch() {
        let (detector, _) = detector();
        let remote = Some("https://github.com/acme/api");
        observe(&detector, project("/work/api", remote, "feature-1"));
        assert!(observe(&detector, project("/work/api", remote, "feature-2")).is_none());

        observe(&detector, project("/work/api", remote, "main"));
        let result = observe(&detector, project("/work/api", remote, "develop")).unwrap();
        assert_eq!(result.param_str("switch_type"), Some("branch"));
        assert!((result.confidence - 0.75).abs() < 1e-9);
        assert_eq!(result.reason, "Switched branch in api: main → develop");
    }

    #[test]
    fn test_branch_switch_can_be_disabled() {
        let settings = DetectorSettings::enabled_at(1).with_option("detect_branch_switch", json!(false));
        let (detector, _) = detector_with(settings);
        observe(&detector, project("/work/api", None, "main"));
        assert!(observe(&detector, project("/work/api", None, "develop")).is_none());
    }

    #[test]
    fn test_custom_major_branches() {
        let settings =
            DetectorSettings::enabled_at(1).with_option("major_branches", json!(["trunk"]));
        let (detector, _) = detector_with(settings);
        observe(&detector, project("/work/api", None, "main"));
        assert!(observe(&detector, project("/work/api", None, "develop")).is_none());
        assert!(observe(&detector, project("/work/api", None, "trunk")).is_some());
    }

    #[test]
    fn test_tracker_records_uncommitted_state() {
        let tracker = Arc::new(StubTracker {
            dirty: true,
            ..StubTracker::default()
        });
        let detector =
            ProjectSwitchDetector::new(&DetectorSettings::enabled_at(1), tracker.clone()).unwrap();
        observe(&detector, project("/work/api", None, "main"));
        let active = tracker.active.lock().unwrap().clone().unwrap();
        assert!(active.has_uncommitted_changes);
        assert!(active.last_checkpoint.is_some());
    }

    #[test]
    fn test_tracker_failure_means_no_trigger() {
        let tracker = Arc::new(StubTracker {
            broken: true,
            ..StubTracker::default()
        });
        let detector = ProjectSwitchDetector::new(&DetectorSettings::enabled_at(1), tracker).unwrap();
        let ctx = TriggerContext::new("s1", "/work/api")
            .with_project(project("/work/api", None, "main"));
        assert!(detector.evaluate("x", &ctx).unwrap().is_none());
    }
}
