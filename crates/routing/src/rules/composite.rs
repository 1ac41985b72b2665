//! CompositeRule - boolean combination of sub-rules

use std::sync::Arc;

use contracts::{ChangeRecord, CompositeLogic, ContractError};

use super::RoutingRule;

/// Combines sub-rules with ALL / ANY / NONE
///
/// Sub-rules are evaluated lazily in order and short-circuit, so stateful
/// children after the deciding one are not consulted. An empty sub-rule list
/// never matches, whatever the logic.
#[derive(Clone)]
pub struct CompositeRule {
    name: String,
    priority: i32,
    logic: CompositeLogic,
    rules: Vec<Arc<dyn RoutingRule>>,
    destinations: Vec<String>,
}

impl CompositeRule {
    pub fn new(
        name: impl Into<String>,
        logic: CompositeLogic,
        rules: Vec<Arc<dyn RoutingRule>>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            logic,
            rules,
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn logic(&self) -> CompositeLogic {
        self.logic
    }

    pub fn rules(&self) -> &[Arc<dyn RoutingRule>] {
        &self.rules
    }

    fn any_applies(&self, change: &ChangeRecord, table: &str) -> Result<bool, ContractError> {
        for rule in &self.rules {
            if rule.should_apply(change, table)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl std::fmt::Debug for CompositeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("CompositeRule")
            .field("name", &self.name)
            .field("logic", &self.logic)
            .field("rules", &names)
            .field("destinations", &self.destinations)
            .finish()
    }
}

impl RoutingRule for CompositeRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, change: &ChangeRecord, table: &str) -> Result<bool, ContractError> {
        if self.rules.is_empty() {
            return Ok(false);
        }

        match self.logic {
            CompositeLogic::All => {
                for rule in &self.rules {
                    if !rule.should_apply(change, table)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CompositeLogic::Any => self.any_applies(change, table),
            CompositeLogic::None => Ok(!self.any_applies(change, table)?),
        }
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}
