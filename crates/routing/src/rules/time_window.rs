//! TimeWindowRule - matches by current UTC time-of-day

use chrono::{Datelike, NaiveTime, Weekday};
use contracts::{ChangeRecord, ContractError};

use super::{time_in_window, RoutingRule};
use crate::clock::{SharedClock, SystemClock};

/// Routes changes while the clock is inside `[start, end]`
#[derive(Debug, Clone)]
pub struct TimeWindowRule {
    name: String,
    priority: i32,
    start: NaiveTime,
    end: NaiveTime,
    exclude_weekends: bool,
    clock: SharedClock,
    destinations: Vec<String>,
}

impl TimeWindowRule {
    pub fn new(
        name: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            start,
            end,
            exclude_weekends: false,
            clock: SystemClock::shared(),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exclude_weekends(mut self, exclude: bool) -> Self {
        self.exclude_weekends = exclude;
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
}

impl RoutingRule for TimeWindowRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, _change: &ChangeRecord, _table: &str) -> Result<bool, ContractError> {
        let now = self.clock.now();
        if self.exclude_weekends && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return Ok(false);
        }
        Ok(time_in_window(now.time(), self.start, self.end))
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}
