//! BusinessHoursRule - primary vs after-hours destinations
//!
//! The "are we open" decision is taken once per evaluation and drives both
//! the match flag and the destination list, so a change evaluated on a
//! window boundary cannot match as open and then route as closed.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use contracts::{ChangeRecord, ContractError};

use super::{time_in_window, RoutingRule};
use crate::clock::{SharedClock, SystemClock};

/// Routes to `destinations` during business hours, `after_hours` otherwise
///
/// `should_apply` is true inside business hours, and also outside them when
/// an after-hours list is configured. Without one, the rule does not match
/// outside business hours.
#[derive(Debug, Clone)]
pub struct BusinessHoursRule {
    name: String,
    priority: i32,
    weekdays: HashSet<Weekday>,
    start: NaiveTime,
    end: NaiveTime,
    clock: SharedClock,
    destinations: Vec<String>,
    after_hours: Vec<String>,
}

impl BusinessHoursRule {
    pub fn new(
        name: impl Into<String>,
        weekdays: impl IntoIterator<Item = Weekday>,
        start: NaiveTime,
        end: NaiveTime,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            weekdays: weekdays.into_iter().collect(),
            start,
            end,
            clock: SystemClock::shared(),
            destinations: destinations.into_iter().map(Into::into).collect(),
            after_hours: Vec::new(),
        }
    }

    pub fn with_after_hours(mut self, destinations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.after_hours = destinations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether `at` falls on a configured weekday inside the window
    pub fn is_business_hours(&self, at: DateTime<Utc>) -> bool {
        self.weekdays.contains(&at.weekday()) && time_in_window(at.time(), self.start, self.end)
    }

    fn resolve(&self, open: bool) -> Option<&[String]> {
        if open {
            Some(&self.destinations)
        } else if !self.after_hours.is_empty() {
            Some(&self.after_hours)
        } else {
            None
        }
    }
}

impl RoutingRule for BusinessHoursRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, _change: &ChangeRecord, _table: &str) -> Result<bool, ContractError> {
        Ok(self.resolve(self.is_business_hours(self.clock.now())).is_some())
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        let open = self.is_business_hours(self.clock.now());
        if open {
            self.destinations.clone()
        } else {
            self.after_hours.clone()
        }
    }

    fn evaluate(
        &self,
        _change: &ChangeRecord,
        _table: &str,
    ) -> Result<Option<Vec<String>>, ContractError> {
        let open = self.is_business_hours(self.clock.now());
        Ok(self.resolve(open).map(<[String]>::to_vec))
    }
}
