//! FrequencyRule - per-table sliding-window rate limit
//!
//! Evaluation is NOT idempotent: a matching `should_apply` records the
//! attempt in the table's window. Over-limit evaluations record nothing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use contracts::{ChangeRecord, ContractError};
use tracing::debug;

use super::RoutingRule;
use crate::clock::{SharedClock, SystemClock};

const DEFAULT_WINDOW_SECS: i64 = 60;
const DEFAULT_MAX_TRACKED_TABLES: usize = 10_000;

type Windows = HashMap<String, VecDeque<DateTime<Utc>>>;

/// Routes at most `max_per_window` changes per table in the trailing window
#[derive(Debug)]
pub struct FrequencyRule {
    name: String,
    priority: i32,
    max_per_window: usize,
    window: TimeDelta,
    max_tracked_tables: usize,
    clock: SharedClock,
    /// table -> match timestamps, oldest first
    windows: Mutex<Windows>,
    destinations: Vec<String>,
}

impl FrequencyRule {
    pub fn new(
        name: impl Into<String>,
        max_per_window: usize,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            max_per_window,
            window: TimeDelta::seconds(DEFAULT_WINDOW_SECS),
            max_tracked_tables: DEFAULT_MAX_TRACKED_TABLES,
            clock: SystemClock::shared(),
            windows: Mutex::new(HashMap::new()),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_window(mut self, window: TimeDelta) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_tracked_tables(mut self, max: usize) -> Self {
        self.max_tracked_tables = max.max(1);
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

    /// Matches recorded for `table` inside the current window
    pub fn recent_count(&self, table: &str) -> usize {
        let cutoff = self.clock.now() - self.window;
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows
            .get(table)
            .map_or(0, |entries| entries.iter().filter(|t| **t >= cutoff).count())
    }

    /// Number of tables with live window state
    pub fn tracked_tables(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn prune(entries: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
        while entries.front().is_some_and(|t| *t < cutoff) {
            entries.pop_front();
        }
    }

    /// Drop expired timestamps everywhere and forget idle tables
    fn compact(windows: &mut Windows, cutoff: DateTime<Utc>) {
        windows.retain(|_, entries| {
            Self::prune(entries, cutoff);
            !entries.is_empty()
        });
    }

    fn try_acquire(&self, table: &str) -> bool {
        let now = self.clock.now();
        let cutoff = now - self.window;
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if !windows.contains_key(table) && windows.len() >= self.max_tracked_tables {
            let before = windows.len();
            Self::compact(&mut windows, cutoff);
            debug!(
                rule = %self.name,
                before,
                after = windows.len(),
                "Compacted frequency windows"
            );
        }

        let entries = windows.entry(table.to_string()).or_default();
        Self::prune(entries, cutoff);

        if entries.len() < self.max_per_window {
            entries.push_back(now);
            true
        } else {
            false
        }
    }
}

impl RoutingRule for FrequencyRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, _change: &ChangeRecord, table: &str) -> Result<bool, ContractError> {
        Ok(self.try_acquire(table))
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}
