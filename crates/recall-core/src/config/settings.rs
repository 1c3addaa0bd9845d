use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use recall_memory::McpSettings;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

const CLAUDE_DIR: &str = ".claude";
const CONFIG_FILE: &str = "memory-trigger-config.json";
const STATE_FILE: &str = "memory-trigger-state.json";
const ACTIVE_PROJECT_FILE: &str = "active-project.json";
const MEMORY_DIR: &str = ".claude-memory";
const MEMORY_FILE: &str = "memory.jsonl";

/// Engine configuration, loaded once per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Detector sections keyed by config name (`keyword`, `project_switch`, ...).
    pub detectors: BTreeMap<String, DetectorSettings>,
    pub budget: BudgetSettings,
    pub mcp: McpSettings,
    pub logging: LoggingSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut detectors = BTreeMap::new();
        detectors.insert(
            "project_switch".to_string(),
            DetectorSettings::enabled_at(1)
                .with_option("detect_branch_switch", Value::Bool(true))
                .with_option(
                    "major_branches",
                    serde_json::json!(["main", "master", "develop", "development"]),
                ),
        );
        detectors.insert("keyword".to_string(), DetectorSettings::enabled_at(2));
        Self {
            detectors,
            budget: BudgetSettings::default(),
            mcp: McpSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Read config from a JSON file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    /// Like [`EngineConfig::load`], but any failure falls back to the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {e}");
                Self::default()
            }
        }
    }

    /// Write config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn detector(&self, key: &str) -> Option<&DetectorSettings> {
        self.detectors.get(key)
    }
}

/// One detector section: `enabled`, `priority`, and detector-specific options
/// flattened alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

impl DetectorSettings {
    pub fn enabled_at(priority: i32) -> Self {
        Self {
            enabled: Some(true),
            priority: Some(priority),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    /// Auto-registration only picks up sections that say `enabled: true`.
    pub fn wants_registration(&self) -> bool {
        self.enabled == Some(true)
    }

    /// The detector's own enabled flag; absent means enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Parse the detector-specific options into a typed struct.
    pub fn parse_options<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_value(Value::Object(self.options.clone()))
            .map_err(|e| CoreError::Config(format!("invalid detector options: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub max_tokens_per_session: u64,
    pub max_tokens_per_trigger: u64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            max_tokens_per_session: 5000,
            max_tokens_per_trigger: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Relative paths are resolved against `$HOME`.
    pub file: PathBuf,
    pub max_size_mb: u64,
    pub backup_count: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: PathBuf::from(CLAUDE_DIR).join("memory-trigger.log"),
            max_size_mb: 10,
            backup_count: 3,
        }
    }
}

/// Where the engine keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    pub home: PathBuf,
    pub config: PathBuf,
    pub state: PathBuf,
    pub active_project: PathBuf,
}

impl EnginePaths {
    /// Standard layout under `<home>/.claude/`.
    pub fn under_home(home: &Path) -> Self {
        let claude_dir = home.join(CLAUDE_DIR);
        Self {
            home: home.to_path_buf(),
            config: claude_dir.join(CONFIG_FILE),
            state: claude_dir.join(STATE_FILE),
            active_project: claude_dir.join(ACTIVE_PROJECT_FILE),
        }
    }

    /// Standard layout under `$HOME`.
    pub fn discover() -> Option<Self> {
        std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .map(|h| Self::under_home(Path::new(&h)))
    }

    pub fn with_config(mut self, config: PathBuf) -> Self {
        self.config = config;
        self
    }

    /// Resolve a configured path: absolute paths pass through, relative ones hang off home.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        }
    }

    /// Knowledge-graph file: `mcp.memory_file` if set, else `~/.claude-memory/memory.jsonl`.
    pub fn memory_file(&self, mcp: &McpSettings) -> PathBuf {
        match &mcp.memory_file {
            Some(path) => self.resolve(path),
            None => self.home.join(MEMORY_DIR).join(MEMORY_FILE),
        }
    }
}
