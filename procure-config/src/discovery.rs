//! Configuration file discovery
//!
//! Finds `procure.{toml,yaml,yml,json}` in the global configuration directory
//! and in the project's `.procure/` directory. Global files sort first so the
//! project files win when figment merges them.

use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Base name of every configuration file
const FILE_STEM: &str = "procure";

/// Directory name used for project-level configuration
pub const PROJECT_DIR_NAME: &str = ".procure";

/// A discovered configuration file
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub path: PathBuf,
    pub format: ConfigFormat,
    pub scope: ConfigScope,
}

/// Configuration file format detected from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Where a configuration file was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigScope {
    Global,
    Project,
}

/// File discovery service for finding configuration files
#[derive(Debug, Clone, Default)]
pub struct FileDiscovery {
    project_dir: Option<PathBuf>,
    global_dir: Option<PathBuf>,
    skip_global: bool,
}

impl FileDiscovery {
    /// Discovery rooted at the current directory and the user config directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit project configuration directory
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Use an explicit global configuration directory
    pub fn with_global_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_dir = Some(dir.into());
        self
    }

    /// Ignore the user's global configuration
    pub fn without_global(mut self) -> Self {
        self.skip_global = true;
        self
    }

    /// Discover all configuration files, lowest precedence first
    pub fn discover_all(&self) -> Vec<ConfigFile> {
        let mut files = Vec::new();

        if !self.skip_global {
            if let Some(dir) = self.global_dir.clone().or_else(resolve_global_dir) {
                files.extend(search_directory(&dir, ConfigScope::Global));
            }
        }

        if let Some(dir) = self.project_dir.clone().or_else(resolve_project_dir) {
            files.extend(search_directory(&dir, ConfigScope::Project));
        }

        files.sort_by_key(|f| f.scope);

        debug!(count = files.len(), "discovered configuration files");
        files
    }
}

fn search_directory(dir: &Path, scope: ConfigScope) -> Vec<ConfigFile> {
    if !dir.is_dir() {
        if dir.exists() {
            warn!("Path exists but is not a directory: {}", dir.display());
        }
        return Vec::new();
    }

    ["toml", "yaml", "yml", "json"]
        .iter()
        .filter_map(|ext| {
            let path = dir.join(format!("{FILE_STEM}.{ext}"));
            if !path.is_file() {
                return None;
            }
            let format = ConfigFormat::from_extension(ext)?;
            trace!("Found config: {} ({:?})", path.display(), format);
            Some(ConfigFile {
                path,
                format,
                scope,
            })
        })
        .collect()
}

fn resolve_project_dir() -> Option<PathBuf> {
    let dir = std::env::current_dir().ok()?.join(PROJECT_DIR_NAME);
    dir.is_dir().then_some(dir)
}

fn resolve_global_dir() -> Option<PathBuf> {
    let dir = dirs::config_dir()?.join("procure");
    dir.is_dir().then_some(dir)
}
