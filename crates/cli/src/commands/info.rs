//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{RoutingConfig, RuleConfig, RuleKind};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    engine: EngineInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    destinations: Option<Vec<DestinationInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rules: Option<Vec<RuleInfo>>,
}

#[derive(Serialize)]
struct EngineInfo {
    max_concurrent_changes: usize,
    parallel_delivery: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery_timeout_ms: Option<u64>,
    shutdown_timeout_ms: u64,
    event_capacity: usize,
    max_tracked_destinations: usize,
}

#[derive(Serialize)]
struct DestinationInfo {
    name: String,
    destination_type: String,
    enabled: bool,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    params: std::collections::HashMap<String, String>,
}

#[derive(Serialize)]
struct RuleInfo {
    name: String,
    kind: &'static str,
    priority: i32,
    destinations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<RuleInfo>,
}

impl From<&RuleConfig> for RuleInfo {
    fn from(rule: &RuleConfig) -> Self {
        let children = match &rule.kind {
            RuleKind::Composite { rules, .. } => rules.iter().map(RuleInfo::from).collect(),
            _ => Vec::new(),
        };
        Self {
            name: rule.name.clone(),
            kind: rule.kind.tag(),
            priority: rule.priority,
            destinations: rule
                .referenced_destinations()
                .into_iter()
                .map(str::to_string)
                .collect(),
            children,
        }
    }
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(&args.config).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, args);
    }

    Ok(())
}

fn build_config_info(config: &RoutingConfig, args: &InfoArgs) -> ConfigInfo {
    let engine = &config.engine;
    ConfigInfo {
        version: format!("{:?}", config.version),
        engine: EngineInfo {
            max_concurrent_changes: engine.max_concurrent_changes,
            parallel_delivery: engine.parallel_delivery,
            delivery_timeout_ms: engine.delivery_timeout_ms,
            shutdown_timeout_ms: engine.shutdown_timeout_ms,
            event_capacity: engine.event_capacity,
            max_tracked_destinations: engine.max_tracked_destinations,
        },
        destinations: args.destinations.then(|| {
            config
                .destinations
                .iter()
                .map(|d| DestinationInfo {
                    name: d.name.clone(),
                    destination_type: format!("{:?}", d.destination_type),
                    enabled: d.enabled,
                    queue_capacity: d.queue_capacity,
                    params: d.params.clone(),
                })
                .collect()
        }),
        rules: args
            .rules
            .then(|| config.rules.iter().map(RuleInfo::from).collect()),
    }
}

fn print_config_info(config: &RoutingConfig, args: &InfoArgs) {
    let engine = &config.engine;

    println!("\n=== Router Configuration ===\n");
    println!("Version: {:?}", config.version);
    println!("\nEngine:");
    println!("  Max concurrent changes: {}", engine.max_concurrent_changes);
    println!("  Parallel delivery: {}", engine.parallel_delivery);
    match engine.delivery_timeout_ms {
        Some(ms) => println!("  Delivery timeout: {}ms", ms),
        None => println!("  Delivery timeout: none"),
    }
    println!("  Shutdown timeout: {}ms", engine.shutdown_timeout_ms);
    println!("  Event capacity: {}", engine.event_capacity);

    println!("\nDestinations ({}):", config.destinations.len());
    if args.destinations {
        for d in &config.destinations {
            let state = if d.enabled { "enabled" } else { "disabled" };
            println!(
                "  - {} ({:?}, {}, queue={})",
                d.name, d.destination_type, state, d.queue_capacity
            );
            for (key, value) in &d.params {
                println!("      {}: {}", key, value);
            }
        }
    }

    println!("\nRules ({}):", config.rules.len());
    if args.rules {
        for rule in &config.rules {
            print_rule(&RuleInfo::from(rule), 1);
        }
    }

    println!();
}

fn print_rule(rule: &RuleInfo, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{}- {} [{}] priority={} -> {}",
        indent,
        rule.name,
        rule.kind,
        rule.priority,
        rule.destinations.join(", ")
    );
    for child in &rule.children {
        print_rule(child, depth + 1);
    }
}
