//! OperationRule - matches by mutation kind

use std::collections::HashSet;

use contracts::{ChangeOperation, ChangeRecord, ContractError};

use super::RoutingRule;

/// Routes changes whose operation is in the configured set
#[derive(Debug, Clone)]
pub struct OperationRule {
    name: String,
    priority: i32,
    operations: HashSet<ChangeOperation>,
    destinations: Vec<String>,
}

impl OperationRule {
    pub fn new(
        name: impl Into<String>,
        operations: impl IntoIterator<Item = ChangeOperation>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            operations: operations.into_iter().collect(),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl RoutingRule for OperationRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, change: &ChangeRecord, _table: &str) -> Result<bool, ContractError> {
        Ok(self.operations.contains(&change.operation))
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}
