//! Configuration provider using Figment

use crate::{
    discovery::{ConfigFile, ConfigFormat, FileDiscovery},
    error::ConfigError,
    types::EngineConfig,
    ConfigResult,
};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use std::path::PathBuf;
use tracing::{debug, trace};

/// Environment variable prefix, e.g. `PROCURE_PAGE_SIZE=20`
pub const ENV_PREFIX: &str = "PROCURE_";

/// Loads `EngineConfig` from every source in precedence order.
///
/// Sources, later overriding earlier:
/// 1. Compiled defaults
/// 2. Discovered configuration files (global, then project)
/// 3. Explicit files added with `with_file`
/// 4. `PROCURE_` environment variables
///
/// Nothing is cached; every `load` reads the sources again.
#[derive(Debug, Default)]
pub struct ConfigProvider {
    discovery: FileDiscovery,
    extra_files: Vec<PathBuf>,
}

impl ConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the file discovery used to find configuration files
    pub fn with_discovery(mut self, discovery: FileDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Merge an explicit configuration file after the discovered ones
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_files.push(path.into());
        self
    }

    /// Load and validate the engine configuration
    pub fn load(&self) -> ConfigResult<EngineConfig> {
        let config: EngineConfig = self.build_figment()?.extract()?;
        config.validate()?;
        debug!(
            page_size = config.page_size,
            search_debounce_ms = config.search_debounce_ms,
            "loaded engine configuration"
        );
        Ok(config)
    }

    fn build_figment(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

        for file in self.discovery.discover_all() {
            figment = figment.merge(file_provider(&file));
        }

        for path in &self.extra_files {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound { path: path.clone() });
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            let format =
                ConfigFormat::from_extension(ext).ok_or_else(|| ConfigError::UnsupportedFormat {
                    format: ext.to_string(),
                })?;
            figment = figment.merge(file_provider(&ConfigFile {
                path: path.clone(),
                format,
                scope: crate::discovery::ConfigScope::Project,
            }));
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }
}

fn file_provider(file: &ConfigFile) -> Figment {
    trace!("Loading config file: {} ({:?})", file.path.display(), file.format);
    match file.format {
        ConfigFormat::Toml => Figment::from(Toml::file(&file.path)),
        ConfigFormat::Yaml => Figment::from(Yaml::file(&file.path)),
        ConfigFormat::Json => Figment::from(Json::file(&file.path)),
    }
}
