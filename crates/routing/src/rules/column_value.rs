//! ColumnValueRule - matches a metadata entry against a configured value

use contracts::{ChangeRecord, ContractError, MetadataValue};

use super::RoutingRule;

/// Routes changes whose `column` metadata equals `expected`
///
/// Strings compare case-insensitively unless configured otherwise; every
/// other value type compares structurally, so `Int(5)` never equals `Long(5)`.
#[derive(Debug, Clone)]
pub struct ColumnValueRule {
    name: String,
    priority: i32,
    column: String,
    expected: MetadataValue,
    case_sensitive: bool,
    destinations: Vec<String>,
}

impl ColumnValueRule {
    pub fn new(
        name: impl Into<String>,
        column: impl Into<String>,
        expected: impl Into<MetadataValue>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            column: column.into(),
            expected: expected.into(),
            case_sensitive: false,
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn value_matches(&self, actual: &MetadataValue) -> bool {
        match (actual, &self.expected) {
            (MetadataValue::String(a), MetadataValue::String(b)) if !self.case_sensitive => {
                a.to_lowercase() == b.to_lowercase()
            }
            (a, b) => a == b,
        }
    }
}

impl RoutingRule for ColumnValueRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, change: &ChangeRecord, _table: &str) -> Result<bool, ContractError> {
        Ok(change
            .metadata
            .get(&self.column)
            .is_some_and(|actual| self.value_matches(actual)))
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
    fn test_string_comparison_case_insensitive_by_default() {
        let rule = ColumnValueRule::new("shipped", "status", "SHIPPED", ["d1"]);
        let c = change("c1").with_metadata("status", "shipped");
        assert!(rule.should_apply(&c, "orders").unwrap());

        let strict = rule.clone().case_sensitive(true);
        assert!(!strict.should_apply(&c, "orders").unwrap());
    }

    #[test]
    fn test_missing_column_does_not_match() {
        let rule = ColumnValueRule::new("shipped", "status", "shipped", ["d1"]);
        assert!(!rule.should_apply(&change("c1"), "orders").unwrap());
    }

    #[test]
    fn test_non_string_values_compare_structurally() {
        let rule = ColumnValueRule::new("qty", "qty", 5, ["d1"]);

        let int = change("c1").with_metadata("qty", 5);
        let long = change("c2").with_metadata("qty", 5i64);
        let text = change("c3").with_metadata("qty", "5");

        assert!(rule.should_apply(&int, "orders").unwrap());
        assert!(!rule.should_apply(&long, "orders").unwrap());
        assert!(!rule.should_apply(&text, "orders").unwrap());
    }
}
