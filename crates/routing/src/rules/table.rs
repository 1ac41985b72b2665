//! TableRule - matches by table identity

use contracts::{ChangeRecord, ContractError, TableMatchMode};

use super::RoutingRule;

/// Routes changes of the configured tables
#[derive(Debug, Clone)]
pub struct TableRule {
    name: String,
    priority: i32,
    /// Lower-cased table names
    tables: Vec<String>,
    match_mode: TableMatchMode,
    destinations: Vec<String>,
}

impl TableRule {
    pub fn new(
        name: impl Into<String>,
        tables: impl IntoIterator<Item = impl Into<String>>,
        match_mode: TableMatchMode,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            tables: tables
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .collect(),
            match_mode,
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn matches(&self, table: &str) -> bool {
        let table = table.to_lowercase();
        match self.match_mode {
            TableMatchMode::Exact => self.tables.iter().any(|t| *t == table),
            TableMatchMode::Contains => self.tables.iter().any(|t| table.contains(t.as_str())),
        }
    }
}

impl RoutingRule for TableRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, _change: &ChangeRecord, table: &str) -> Result<bool, ContractError> {
        Ok(self.matches(table))
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::change;

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let rule = TableRule::new("orders", ["Orders"], TableMatchMode::Exact, ["webhook-1"]);
        let c = change("c1");

        assert!(rule.should_apply(&c, "orders").unwrap());
        assert!(rule.should_apply(&c, "ORDERS").unwrap());
        assert!(!rule.should_apply(&c, "orders_archive").unwrap());
        assert_eq!(rule.destinations(&c, "orders"), vec!["webhook-1"]);
    }

    #[test]
    fn test_contains_match() {
        let rule = TableRule::new("audit", ["audit"], TableMatchMode::Contains, ["d1"]);
        let c = change("c1");

        assert!(rule.should_apply(&c, "user_AUDIT_log").unwrap());
        assert!(!rule.should_apply(&c, "users").unwrap());
    }

    #[test]
    fn test_destinations_returned_regardless_of_match() {
        let rule = TableRule::new("orders", ["orders"], TableMatchMode::Exact, ["d1", "d1"]);
        assert_eq!(rule.destinations(&change("c1"), "customers"), vec!["d1", "d1"]);
    }
}
