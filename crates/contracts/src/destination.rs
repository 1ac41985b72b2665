//! Destination trait - Router output interface
//!
//! Defines the abstract interface every delivery target implements.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ChangeRecord, ContractError, DeliveryResult};

/// Destination category (reporting tag only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    Webhook,
    MessageQueue,
    EventStream,
    Database,
    FileSystem,
    Email,
    Sms,
    Custom,
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Webhook => "webhook",
            Self::MessageQueue => "message_queue",
            Self::EventStream => "event_stream",
            Self::Database => "database",
            Self::FileSystem => "file_system",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Delivery target trait
///
/// All destination implementations must implement this trait.
#[trait_variant::make(Destination: Send)]
pub trait LocalDestination {
    /// Unique dispatch key (used for routing, logging and metrics)
    fn name(&self) -> &str;

    /// Category tag
    fn destination_type(&self) -> DestinationType;

    /// Whether deliveries are currently accepted
    fn is_enabled(&self) -> bool;

    /// Open or close the delivery gate
    fn set_enabled(&mut self, enabled: bool);

    /// Deliver a change
    ///
    /// A disabled destination must return [`DeliveryResult::disabled`] without
    /// performing I/O. Protocol timeouts should come back as a failed
    /// `DeliveryResult`; `Err` is reserved for unexpected faults.
    ///
    /// # Errors
    /// Returns delivery error (should include context)
    async fn deliver(
        &mut self,
        change: &ChangeRecord,
        table: &str,
    ) -> Result<DeliveryResult, ContractError>;

    /// Release resources; called exactly once
    async fn dispose(&mut self) -> Result<(), ContractError>;
}
