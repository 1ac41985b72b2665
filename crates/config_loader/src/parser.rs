//! Router configuration parsing
//!
//! TOML is the primary format, JSON is accepted for generated configs.

use contracts::{ContractError, RoutingConfig};
use std::path::Path;

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Map a file extension to a format, case-insensitively
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Infer the format of a router config file from its extension
    ///
    /// # Errors
    /// `ConfigParse` naming the file when the extension is missing or not
    /// one of `.toml` / `.json`. YAML files get a dedicated message since
    /// they are the most common mistake.
    pub fn from_path(path: &Path) -> Result<Self, ContractError> {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Err(ContractError::config_parse(format!(
                "cannot determine format of {}: expected a .toml or .json extension",
                path.display()
            )));
        };

        if let Some(format) = Self::from_extension(ext) {
            return Ok(format);
        }
        let message = match ext.to_lowercase().as_str() {
            "yaml" | "yml" => format!(
                "YAML router configs are not supported ({}); rewrite it as TOML or JSON",
                path.display()
            ),
            _ => format!(
                "unsupported config format .{ext} ({}); expected .toml or .json",
                path.display()
            ),
        };
        Err(ContractError::config_parse(message))
    }
}

pub fn parse_toml(content: &str) -> Result<RoutingConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<RoutingConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<RoutingConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}
