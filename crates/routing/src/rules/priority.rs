//! PriorityRule - matches by the `Priority` metadata entry

use std::collections::HashSet;

use contracts::{ChangePriority, ChangeRecord, ContractError};

use super::RoutingRule;

/// Routes changes whose priority is in the target set
///
/// Changes without a `Priority` entry of the priority type count as `Low`.
#[derive(Debug, Clone)]
pub struct PriorityRule {
    name: String,
    priority: i32,
    targets: HashSet<ChangePriority>,
    destinations: Vec<String>,
}

impl PriorityRule {
    pub fn new(
        name: impl Into<String>,
        targets: impl IntoIterator<Item = ChangePriority>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            targets: targets.into_iter().collect(),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl RoutingRule for PriorityRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, change: &ChangeRecord, _table: &str) -> Result<bool, ContractError> {
        Ok(self.targets.contains(&change.priority()))
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}
