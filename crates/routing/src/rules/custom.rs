//! CustomRule - externally supplied predicate
//!
//! A predicate that panics or fails means "does not match"; it never
//! aborts routing.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use contracts::{ChangeRecord, ContractError};
use tracing::warn;

use super::RoutingRule;

type Predicate = dyn Fn(&ChangeRecord, &str) -> bool + Send + Sync;

/// Routes changes accepted by an arbitrary predicate
pub struct CustomRule {
    name: String,
    priority: i32,
    predicate: Box<Predicate>,
    destinations: Vec<String>,
}

impl CustomRule {
    pub fn new<F>(
        name: impl Into<String>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&ChangeRecord, &str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: 0,
            predicate: Box::new(predicate),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    /// Predicate whose errors count as "no match"
    pub fn fallible<F, E>(
        name: impl Into<String>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&ChangeRecord, &str) -> Result<bool, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let name = name.into();
        let rule_name = name.clone();
        Self::new(name, destinations, move |change, table| {
            predicate(change, table).unwrap_or_else(|e| {
                warn!(rule = %rule_name, change_id = %change.id, error = %e, "Predicate failed, treating as no match");
                false
            })
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("destinations", &self.destinations)
            .finish_non_exhaustive()
    }
}

impl RoutingRule for CustomRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, change: &ChangeRecord, table: &str) -> Result<bool, ContractError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(change, table))) {
            Ok(matched) => Ok(matched),
            Err(_) => {
                warn!(rule = %self.name, change_id = %change.id, "Predicate panicked, treating as no match");
                Ok(false)
            }
        }
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}
