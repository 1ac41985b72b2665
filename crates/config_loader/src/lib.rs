//! # Config Loader
//!
//! Reads router configuration files into a validated [`RoutingConfig`].
//!
//! - TOML (primary) and JSON, chosen by file extension
//! - rules and destinations are cross-checked after parsing
//! - relative `base_path` params of file destinations are anchored to the
//!   directory holding the config file, so a config behaves the same no
//!   matter where the router is started from
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("router.toml")).unwrap();
//! println!("Rules: {}", config.rules.len());
//! ```

mod parser;
mod validator;

pub use contracts::RoutingConfig;
pub use parser::ConfigFormat;

use contracts::{ContractError, DestinationKind};
use std::path::Path;

/// Param key holding a file destination's output directory
pub const FILE_BASE_PATH_PARAM: &str = "base_path";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a router config file
    ///
    /// Relative file-destination paths are resolved against the file's
    /// parent directory before validation.
    ///
    /// # Errors
    /// Read failure, unsupported extension, parse or validation failure.
    pub fn load_from_path(path: &Path) -> Result<RoutingConfig, ContractError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        let mut config = parser::parse(&content, format)?;
        if let Some(dir) = path.parent() {
            Self::anchor_file_paths(&mut config, dir);
        }
        validator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a string; paths are left as written
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<RoutingConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &RoutingConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    pub fn to_toml(config: &RoutingConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(config: &RoutingConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }

    /// Rewrite relative `base_path` params of file destinations to live under `dir`
    fn anchor_file_paths(config: &mut RoutingConfig, dir: &Path) {
        let file_destinations = config
            .destinations
            .iter_mut()
            .filter(|d| d.destination_type == DestinationKind::File);
        for destination in file_destinations {
            let Some(base_path) = destination.params.get_mut(FILE_BASE_PATH_PARAM) else {
                continue;
            };
            if Path::new(base_path.as_str()).is_relative() {
                *base_path = dir.join(base_path.as_str()).display().to_string();
            }
        }
    }
}
