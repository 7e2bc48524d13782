use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default cache directory name, created under the source tree
pub const DEFAULT_CACHE_DIR: &str = ".nbcache";

/// Config file looked up in the source directory when none is given
pub const CONFIG_FILE: &str = "nbcache.toml";

/// Complete nbcache configuration (loaded from a TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NbcacheConfig {
    #[serde(default)]
    pub execute: ExecuteConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Execution and caching behavior for a build pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteConfig {
    /// Master switch; with this off a build pass only merges and glues
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache location: `true` for the default directory under the source
    /// tree, `false` to disable caching, or an explicit path
    #[serde(default = "default_cache_location")]
    pub cache: CacheLocation,

    /// Re-execute notebooks even when they already carry outputs
    #[serde(default)]
    pub force: bool,

    /// Path substrings; matching documents are excluded from execution
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: default_cache_location(),
            force: false,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Boolean-or-path cache location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CacheLocation {
    Enabled(bool),
    Path(PathBuf),
}

impl CacheLocation {
    /// Resolve to a concrete directory, or `None` when caching is disabled
    pub fn resolve(&self, source_dir: &Path) -> Option<PathBuf> {
        match self {
            CacheLocation::Enabled(true) => Some(source_dir.join(DEFAULT_CACHE_DIR)),
            CacheLocation::Enabled(false) => None,
            CacheLocation::Path(path) => Some(path.clone()),
        }
    }
}

/// The external runner the execution engine shells out to
///
/// Invoked as `command [args...] <input>`; the executed notebook is read
/// from its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_command")]
    pub command: String,

    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,

    /// Worker threads for batch execution; 0 means one per CPU
    #[serde(default)]
    pub workers: usize,
}

impl RunnerConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            args: default_runner_args(),
            workers: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_location() -> CacheLocation {
    CacheLocation::Enabled(true)
}

fn default_runner_command() -> String {
    "jupyter".to_string()
}

fn default_runner_args() -> Vec<String> {
    ["nbconvert", "--to", "notebook", "--execute", "--stdout"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl NbcacheConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load an explicit config file, or `nbcache.toml` from the source
    /// directory when present, or the defaults
    pub fn load_or_default(explicit: Option<&Path>, source_dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let candidate = source_dir.join(CONFIG_FILE);
        if candidate.exists() {
            tracing::info!(path = %candidate.display(), "using config file");
            Self::from_file(&candidate)
        } else {
            Ok(Self::default())
        }
    }
}
