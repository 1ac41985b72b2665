//! LogDestination - reports each change via tracing

use contracts::{ChangeRecord, ContractError, DeliveryResult, Destination, DestinationType};
use std::time::Duration;
use tracing::{info, instrument};

/// Destination that logs change summaries
pub struct LogDestination {
    name: String,
    enabled: bool,
}

impl LogDestination {
    /// Create a new LogDestination with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    fn log_change_summary(&self, change: &ChangeRecord, table: &str) {
        info!(
            destination = %self.name,
            change_id = %change.id,
            table,
            operation = %change.operation,
            position = %change.position,
            priority = change.priority().as_str(),
            metadata = change.metadata.len(),
            "Change received"
        );
    }
}

impl Destination for LogDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn destination_type(&self) -> DestinationType {
        DestinationType::Custom
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[instrument(
        name = "log_destination_deliver",
        skip(self, change),
        fields(destination = %self.name, change_id = %change.id)
    )]
    async fn deliver(
        &mut self,
        change: &ChangeRecord,
        table: &str,
    ) -> Result<DeliveryResult, ContractError> {
        if !self.enabled {
            return Ok(DeliveryResult::disabled());
        }
        self.log_change_summary(change, table);
        Ok(DeliveryResult::success(Duration::ZERO))
    }

    #[instrument(name = "log_destination_dispose", skip(self))]
    async fn dispose(&mut self) -> Result<(), ContractError> {
        info!(destination = %self.name, "LogDestination closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ChangeOperation;

    #[tokio::test]
    async fn test_log_destination_deliver() {
        let mut dest = LogDestination::new("audit");
        let change = ChangeRecord::new("c1", ChangeOperation::Update, "0/16");

        let result = dest.deliver(&change, "orders").await.unwrap();
        assert!(result.success);

        dest.set_enabled(false);
        let result = dest.deliver(&change, "orders").await.unwrap();
        assert!(!result.success);
        assert_eq!(dest.destination_type(), DestinationType::Custom);
    }
}
