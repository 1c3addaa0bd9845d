use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use git2::Repository;
use regex::Regex;
use serde::{Deserialize, Serialize};

static HOSTED_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(github\.com|gitlab\.com|bitbucket\.org)[:/](.+?)(?:\.git)?/?$")
        .expect("hosted remote pattern is valid")
});

const MAX_REMOTE_DISPLAY: usize = 50;

/// Identity of the project the user is working in.
///
/// Two snapshots are compared with the switch rules in
/// `ProjectSwitchDetector`, never with `==`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub absolute_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
}

impl ProjectMetadata {
    /// Describe the project containing `path`.
    ///
    /// Inside a Git work tree the repository root is the project; otherwise the
    /// directory itself is, with no remote or branch.
    pub fn collect(path: &Path) -> Self {
        let Ok(repo) = Repository::discover(path) else {
            return Self::plain(path);
        };
        let Some(workdir) = repo.workdir() else {
            // Bare repository: no work tree to call a project.
            return Self::plain(path);
        };

        let root = canonical(workdir);
        let git_remote_url = repo
            .find_remote("origin")
            .ok()
            .and_then(|r| r.url().map(String::from));

        Self {
            name: dir_name(&root),
            absolute_path: root,
            git_remote_url,
            git_branch: current_branch(&repo),
        }
    }

    fn plain(path: &Path) -> Self {
        let root = canonical(path);
        Self {
            name: dir_name(&root),
            absolute_path: root,
            git_remote_url: None,
            git_branch: None,
        }
    }

    /// The remote URL, treating an empty string as absent.
    pub fn remote(&self) -> Option<&str> {
        self.git_remote_url.as_deref().filter(|r| !r.is_empty())
    }

    /// The branch name, treating an empty string as absent.
    pub fn branch(&self) -> Option<&str> {
        self.git_branch.as_deref().filter(|b| !b.is_empty())
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Branch HEAD points at, including an unborn branch in a fresh repository.
/// Detached HEAD has no branch.
fn current_branch(repo: &Repository) -> Option<String> {
    let head = repo.find_reference("HEAD").ok()?;
    let target = head.symbolic_target()?;
    target.strip_prefix("refs/heads/").map(String::from)
}

/// Canonical form used to compare remotes: no trailing `.git`, `http` upgraded to `https`.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    let url = url.strip_suffix(".git").unwrap_or(url);
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

/// Whether two optional remotes name the same repository after normalization.
pub fn remotes_match(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.map(normalize_remote_url).unwrap_or_default();
    let b = b.map(normalize_remote_url).unwrap_or_default();
    a == b
}

/// Short display form: `github.com/user/repo` for well-known hosts, otherwise
/// the URL truncated to 50 characters.
pub fn shorten_remote_url(url: &str) -> String {
    if let Some(caps) = HOSTED_REMOTE.captures(url) {
        return format!("{}/{}", &caps[1], &caps[2]);
    }
    if url.chars().count() <= MAX_REMOTE_DISPLAY {
        return url.to_string();
    }
    let head: String = url.chars().take(MAX_REMOTE_DISPLAY - 3).collect();
    format!("{head}...")
}
