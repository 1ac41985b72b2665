//! RoutingConfig - Config Loader output
//!
//! Describes a complete router setup: engine tuning, destinations and rules.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use crate::{ChangeOperation, ChangePriority, MetadataValue};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete router configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RoutingConfig {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Engine tuning
    #[serde(default)]
    #[validate(nested)]
    pub engine: EngineSettings,

    /// Destination definitions
    #[serde(default)]
    #[validate(nested)]
    pub destinations: Vec<DestinationConfig>,

    /// Rules, evaluated in declaration order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineSettings {
    /// Fan-out cap for batch routing
    #[serde(default = "default_max_concurrent_changes")]
    #[validate(range(min = 1))]
    pub max_concurrent_changes: usize,

    /// Deliver one change to its destinations concurrently
    #[serde(default)]
    pub parallel_delivery: bool,

    /// Per-delivery timeout in milliseconds (None = wait forever)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub delivery_timeout_ms: Option<u64>,

    /// Routing event broadcast buffer
    #[serde(default = "default_event_capacity")]
    #[validate(range(min = 1))]
    pub event_capacity: usize,

    /// Upper bound on individually tracked destinations in metrics
    #[serde(default = "default_max_tracked_destinations")]
    #[validate(range(min = 1))]
    pub max_tracked_destinations: usize,

    /// Per-destination drain budget on shutdown, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    #[validate(range(min = 1))]
    pub shutdown_timeout_ms: u64,
}

fn default_max_concurrent_changes() -> usize {
    64
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_tracked_destinations() -> usize {
    1024
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_changes: default_max_concurrent_changes(),
            parallel_delivery: false,
            delivery_timeout_ms: None,
            event_capacity: default_event_capacity(),
            max_tracked_destinations: default_max_tracked_destinations(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Destination configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DestinationConfig {
    /// Unique name (dispatch key)
    #[validate(length(min = 1))]
    pub name: String,

    /// Built-in destination implementation
    pub destination_type: DestinationKind,

    /// Initial delivery gate
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Worker queue capacity
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Implementation-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    100
}

/// Built-in destination implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Emits a tracing event per change
    Log,
    /// Appends JSON lines per table under `params.base_path`
    File,
}

/// How table names are matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMatchMode {
    /// Whole-name comparison, case-insensitive
    #[default]
    Exact,
    /// Substring comparison, case-insensitive
    Contains,
}

/// Boolean combinator for composite rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeLogic {
    All,
    Any,
    None,
}

/// Rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Display name
    pub name: String,

    /// Informational priority, never used for ordering
    #[serde(default)]
    pub priority: i32,

    /// Variant-specific settings
    #[serde(flatten)]
    pub kind: RuleKind,
}

/// Rule variant settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    Table {
        tables: Vec<String>,
        #[serde(default)]
        match_mode: TableMatchMode,
        destinations: Vec<String>,
    },
    Operation {
        operations: Vec<ChangeOperation>,
        destinations: Vec<String>,
    },
    ColumnValue {
        column: String,
        value: MetadataValue,
        #[serde(default)]
        case_sensitive: bool,
        destinations: Vec<String>,
    },
    TimeWindow {
        start: NaiveTime,
        end: NaiveTime,
        #[serde(default)]
        exclude_weekends: bool,
        destinations: Vec<String>,
    },
    Frequency {
        max_per_window: usize,
        #[serde(default = "default_window_secs")]
        window_secs: u64,
        #[serde(default = "default_max_tracked_tables")]
        max_tracked_tables: usize,
        destinations: Vec<String>,
    },
    DataSize {
        max_bytes: usize,
        destinations: Vec<String>,
    },
    Composite {
        logic: CompositeLogic,
        #[serde(default)]
        rules: Vec<RuleConfig>,
        destinations: Vec<String>,
    },
    Priority {
        priorities: Vec<ChangePriority>,
        destinations: Vec<String>,
    },
    BusinessHours {
        #[serde(default = "default_business_days")]
        weekdays: Vec<Weekday>,
        start: NaiveTime,
        end: NaiveTime,
        destinations: Vec<String>,
        #[serde(default)]
        after_hours_destinations: Vec<String>,
    },
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_tracked_tables() -> usize {
    10_000
}

fn default_business_days() -> Vec<Weekday> {
    vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
}

impl RuleKind {
    /// Short variant tag (matches the serialized `kind`)
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Table { .. } => "table",
            Self::Operation { .. } => "operation",
            Self::ColumnValue { .. } => "column_value",
            Self::TimeWindow { .. } => "time_window",
            Self::Frequency { .. } => "frequency",
            Self::DataSize { .. } => "data_size",
            Self::Composite { .. } => "composite",
            Self::Priority { .. } => "priority",
            Self::BusinessHours { .. } => "business_hours",
        }
    }
}

impl RuleConfig {
    /// Every destination name this rule (and its sub-rules) can emit
    pub fn referenced_destinations(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_destinations(&mut names);
        names
    }

    fn collect_destinations<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.kind {
            RuleKind::Table { destinations, .. }
            | RuleKind::Operation { destinations, .. }
            | RuleKind::ColumnValue { destinations, .. }
            | RuleKind::TimeWindow { destinations, .. }
            | RuleKind::Frequency { destinations, .. }
            | RuleKind::DataSize { destinations, .. }
            | RuleKind::Priority { destinations, .. } => {
                out.extend(destinations.iter().map(String::as_str));
            }
            RuleKind::Composite {
                rules,
                destinations,
                ..
            } => {
                out.extend(destinations.iter().map(String::as_str));
                for rule in rules {
                    rule.collect_destinations(out);
                }
            }
            RuleKind::BusinessHours {
                destinations,
                after_hours_destinations,
                ..
            } => {
                out.extend(destinations.iter().map(String::as_str));
                out.extend(after_hours_destinations.iter().map(String::as_str));
            }
        }
    }
}
