//! DeliveryResult - uniform outcome of a destination delivery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message returned by a disabled destination
pub const DESTINATION_DISABLED_MESSAGE: &str = "Destination is disabled";

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Whether the destination accepted the change
    pub success: bool,

    /// Failure reason (None on success)
    pub error_message: Option<String>,

    /// Time spent inside the destination
    pub delivery_time: Duration,

    /// Completion time
    pub timestamp: DateTime<Utc>,
}

impl DeliveryResult {
    /// Successful delivery
    pub fn success(delivery_time: Duration) -> Self {
        Self {
            success: true,
            error_message: None,
            delivery_time,
            timestamp: Utc::now(),
        }
    }

    /// Failed delivery
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            delivery_time: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Short-circuit result for a disabled destination
    pub fn disabled() -> Self {
        Self::failure(DESTINATION_DISABLED_MESSAGE)
    }

    /// Attach measured delivery time (builder style)
    pub fn with_delivery_time(mut self, delivery_time: Duration) -> Self {
        self.delivery_time = delivery_time;
        self
    }
}
