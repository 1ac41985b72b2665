//! RoutingResult - outcome of one `route_change` call

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Outcome of routing one change
///
/// `success` is engine-level: it stays true when individual destinations
/// fail and only turns false when rule evaluation itself failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingResult {
    pub change_id: String,
    pub table_name: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Destinations that accepted the change, in delivery order (may repeat)
    pub routed_destinations: Vec<String>,
    /// Human-readable errors, in occurrence order
    pub errors: Vec<String>,
    pub processing_time: Duration,
}

impl RoutingResult {
    pub fn new(change_id: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            change_id: change_id.into(),
            table_name: table_name.into(),
            timestamp: Utc::now(),
            success: true,
            routed_destinations: Vec::new(),
            errors: Vec::new(),
            processing_time: Duration::ZERO,
        }
    }

    /// Mark as an engine-level failure
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.errors.push(message.into());
    }

    /// Some, but not all, targeted destinations accepted the change
    pub fn is_partial_failure(&self) -> bool {
        !self.routed_destinations.is_empty() && !self.errors.is_empty()
    }
}
