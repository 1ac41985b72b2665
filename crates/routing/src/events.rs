//! Routing events broadcast by the engine

use crate::metrics::OverallRoutingStats;
use crate::result::RoutingResult;

/// Event emitted after a change has been routed
///
/// Per call the order is `ChangeRouted` (if anything was delivered),
/// `RoutingFailed` (if any error was recorded), then `RoutingMetricsUpdated`.
/// Engine-level failures emit nothing.
#[derive(Debug, Clone)]
pub enum RoutingEvent {
    ChangeRouted(RoutingResult),
    RoutingFailed(RoutingResult),
    RoutingMetricsUpdated(OverallRoutingStats),
}

impl RoutingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChangeRouted(_) => "change_routed",
            Self::RoutingFailed(_) => "routing_failed",
            Self::RoutingMetricsUpdated(_) => "routing_metrics_updated",
        }
    }
}
