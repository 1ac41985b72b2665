//! DataSizeRule - matches changes below a serialized-size ceiling

use contracts::{ChangeRecord, ContractError, MetadataValue};

use super::RoutingRule;

/// Routes changes whose estimated size is `<= max_bytes`
#[derive(Debug, Clone)]
pub struct DataSizeRule {
    name: String,
    priority: i32,
    max_bytes: usize,
    destinations: Vec<String>,
}

impl DataSizeRule {
    pub fn new(
        name: impl Into<String>,
        max_bytes: usize,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            max_bytes,
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl RoutingRule for DataSizeRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn should_apply(&self, change: &ChangeRecord, _table: &str) -> Result<bool, ContractError> {
        Ok(estimate_change_size(change) <= self.max_bytes)
    }

    fn destinations(&self, _change: &ChangeRecord, _table: &str) -> Vec<String> {
        self.destinations.clone()
    }
}

/// Strings are sized as UTF-16, two bytes per code unit
fn text_size(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Estimated in-memory size of one metadata value
pub fn estimate_value_size(value: &MetadataValue) -> usize {
    match value {
        MetadataValue::String(s) => text_size(s),
        MetadataValue::Int(_) => 4,
        MetadataValue::Long(_) | MetadataValue::Double(_) | MetadataValue::DateTime(_) => 8,
        MetadataValue::Bool(_) => 1,
        MetadataValue::Priority(_) | MetadataValue::Json(_) => 16,
    }
}

/// Estimated size of a change: id, position and every metadata entry
pub fn estimate_change_size(change: &ChangeRecord) -> usize {
    let metadata: usize = change
        .metadata
        .iter()
        .map(|(key, value)| text_size(key) + estimate_value_size(value))
        .sum();

    text_size(&change.id) + text_size(&change.position) + metadata
}
