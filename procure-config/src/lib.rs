//! Configuration for the procure engines using Figment
//!
//! `EngineConfig` carries the handful of tunables the form and table engines
//! need: debounce timing, paging defaults and the placeholder texts used by
//! field display.
//!
//! # Sources
//!
//! - Global: `<config dir>/procure/procure.{toml,yaml,yml,json}`
//! - Project: `./.procure/procure.{toml,yaml,yml,json}`
//! - Environment: `PROCURE_*` (e.g. `PROCURE_SEARCH_DEBOUNCE_MS=150`)
//!
//! ```no_run
//! use procure_config::load_configuration;
//!
//! let config = load_configuration()?;
//! assert!(config.page_size > 0);
//! # Ok::<(), procure_config::ConfigError>(())
//! ```

pub mod discovery;
pub mod error;
pub mod provider;
pub mod types;

#[cfg(test)]
mod tests;

pub use discovery::{ConfigFile, ConfigFormat, ConfigScope, FileDiscovery};
pub use error::ConfigError;
pub use provider::{ConfigProvider, ENV_PREFIX};
pub use types::EngineConfig;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load the engine configuration from all default sources
pub fn load_configuration() -> ConfigResult<EngineConfig> {
    ConfigProvider::new().load()
}
