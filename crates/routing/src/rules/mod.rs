//! Routing rules
//!
//! A rule is a named predicate plus a destination-name resolver evaluated
//! against a `(change, table)` pair. Rules are evaluated in registration
//! order; `priority` is reporting metadata only.

mod business_hours;
mod column_value;
mod composite;
mod custom;
mod data_size;
mod frequency;
mod operation;
mod priority;
mod table;
mod time_window;

pub use business_hours::BusinessHoursRule;
pub use column_value::ColumnValueRule;
pub use composite::CompositeRule;
pub use custom::CustomRule;
pub use data_size::{estimate_change_size, estimate_value_size, DataSizeRule};
pub use frequency::FrequencyRule;
pub use operation::OperationRule;
pub use priority::PriorityRule;
pub use table::TableRule;
pub use time_window::TimeWindowRule;

use std::sync::Arc;

use chrono::{NaiveTime, TimeDelta};
use contracts::{ChangeRecord, ContractError, RuleConfig, RuleKind};

use crate::clock::SharedClock;
use crate::error::RoutingError;

/// Routing rule trait
///
/// `should_apply` may have side effects ([`FrequencyRule`] consumes a
/// rate-limit slot on every match), so callers should evaluate a rule once
/// per change. `destinations` returns the configured list regardless of the
/// match outcome; ask for it only after a match, or use [`RoutingRule::evaluate`].
pub trait RoutingRule: Send + Sync {
    /// Display name (uniqueness not enforced)
    fn name(&self) -> &str;

    /// Informational priority
    fn priority(&self) -> i32;

    /// Whether the change should be routed by this rule
    ///
    /// # Errors
    /// An error aborts routing of the whole change
    fn should_apply(&self, change: &ChangeRecord, table: &str) -> Result<bool, ContractError>;

    /// Destination names, in order (duplicates allowed)
    fn destinations(&self, change: &ChangeRecord, table: &str) -> Vec<String>;

    /// Decide once and resolve destinations on match
    fn evaluate(
        &self,
        change: &ChangeRecord,
        table: &str,
    ) -> Result<Option<Vec<String>>, ContractError> {
        if self.should_apply(change, table)? {
            Ok(Some(self.destinations(change, table)))
        } else {
            Ok(None)
        }
    }
}

/// Inclusive time-of-day window; wraps past midnight when `start > end`
pub(crate) fn time_in_window(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        time >= start && time <= end
    } else {
        time >= start || time <= end
    }
}

/// Build a rule from configuration
pub fn build_rule(
    config: &RuleConfig,
    clock: &SharedClock,
) -> Result<Arc<dyn RoutingRule>, RoutingError> {
    let name = config.name.clone();
    let priority = config.priority;

    let rule: Arc<dyn RoutingRule> = match &config.kind {
        RuleKind::Table {
            tables,
            match_mode,
            destinations,
        } => Arc::new(
            TableRule::new(name, tables.clone(), *match_mode, destinations.clone())
                .with_priority(priority),
        ),
        RuleKind::Operation {
            operations,
            destinations,
        } => Arc::new(
            OperationRule::new(name, operations.iter().copied(), destinations.clone())
                .with_priority(priority),
        ),
        RuleKind::ColumnValue {
            column,
            value,
            case_sensitive,
            destinations,
        } => Arc::new(
            ColumnValueRule::new(name, column.clone(), value.clone(), destinations.clone())
                .case_sensitive(*case_sensitive)
                .with_priority(priority),
        ),
        RuleKind::TimeWindow {
            start,
            end,
            exclude_weekends,
            destinations,
        } => Arc::new(
            TimeWindowRule::new(name, *start, *end, destinations.clone())
                .exclude_weekends(*exclude_weekends)
                .with_clock(Arc::clone(clock))
                .with_priority(priority),
        ),
        RuleKind::Frequency {
            max_per_window,
            window_secs,
            max_tracked_tables,
            destinations,
        } => {
            let window_secs = i64::try_from(*window_secs)
                .map_err(|_| RoutingError::rule_creation(&name, "window_secs out of range"))?;
            Arc::new(
                FrequencyRule::new(name, *max_per_window, destinations.clone())
                    .with_window(TimeDelta::seconds(window_secs))
                    .with_max_tracked_tables(*max_tracked_tables)
                    .with_clock(Arc::clone(clock))
                    .with_priority(priority),
            )
        }
        RuleKind::DataSize {
            max_bytes,
            destinations,
        } => Arc::new(
            DataSizeRule::new(name, *max_bytes, destinations.clone()).with_priority(priority),
        ),
        RuleKind::Composite {
            logic,
            rules,
            destinations,
        } => {
            let children = rules
                .iter()
                .map(|child| build_rule(child, clock))
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(
                CompositeRule::new(name, *logic, children, destinations.clone())
                    .with_priority(priority),
            )
        }
        RuleKind::Priority {
            priorities,
            destinations,
        } => Arc::new(
            PriorityRule::new(name, priorities.iter().copied(), destinations.clone())
                .with_priority(priority),
        ),
        RuleKind::BusinessHours {
            weekdays,
            start,
            end,
            destinations,
            after_hours_destinations,
        } => Arc::new(
            BusinessHoursRule::new(
                name,
                weekdays.iter().copied(),
                *start,
                *end,
                destinations.clone(),
            )
            .with_after_hours(after_hours_destinations.clone())
            .with_clock(Arc::clone(clock))
            .with_priority(priority),
        ),
    };

    Ok(rule)
}
