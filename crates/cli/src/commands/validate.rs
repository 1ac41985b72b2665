//! `validate` command implementation.

use std::collections::HashSet;

use anyhow::{Context, Result};
use contracts::RoutingConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    destination_count: usize,
    rule_count: usize,
    max_concurrent_changes: usize,
    parallel_delivery: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    destination_count: config.destinations.len(),
                    rule_count: config.rules.len(),
                    max_concurrent_changes: config.engine.max_concurrent_changes,
                    parallel_delivery: config.engine.parallel_delivery,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RoutingConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.destinations.is_empty() {
        warnings.push("No destinations configured - every change will be unrouted".to_string());
    }
    if config.rules.is_empty() {
        warnings.push("No rules configured - no change will match".to_string());
    }

    let referenced: HashSet<&str> = config
        .rules
        .iter()
        .flat_map(|r| r.referenced_destinations())
        .collect();
    for destination in &config.destinations {
        if !referenced.contains(destination.name.as_str()) {
            warnings.push(format!(
                "Destination '{}' is not referenced by any rule",
                destination.name
            ));
        }
        if !destination.enabled {
            warnings.push(format!(
                "Destination '{}' is disabled - deliveries will fail",
                destination.name
            ));
        }
    }

    for rule in &config.rules {
        if rule.referenced_destinations().is_empty() {
            warnings.push(format!("Rule '{}' has no destinations", rule.name));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Destinations: {}", summary.destination_count);
            println!("  Rules: {}", summary.rule_count);
            println!("  Max concurrent changes: {}", summary.max_concurrent_changes);
            println!("  Parallel delivery: {}", summary.parallel_delivery);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
