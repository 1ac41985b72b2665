//! Route run statistics.

use std::time::Duration;

use observability::RunningStats;
use routing::{DestinationRoutingStats, OverallRoutingStats, RoutingResult};

/// Statistics from a `route` run
#[derive(Debug, Clone, Default)]
pub struct RouteReport {
    /// Change lines read from the input
    pub changes_read: u64,

    /// Changes accepted by every targeted destination
    pub changes_routed: u64,

    /// Changes accepted by some, but not all, targeted destinations
    pub changes_partial: u64,

    /// Changes that failed rule evaluation or reached no destination
    pub changes_failed: u64,

    /// Changes no rule matched
    pub changes_unrouted: u64,

    /// Whether the run was interrupted
    pub cancelled: bool,

    /// Total duration of the run
    pub duration: Duration,

    /// Per-change processing time in milliseconds
    pub processing_ms: RunningStats,

    /// Engine totals at the end of the run
    pub overall: OverallRoutingStats,

    /// Engine per-destination stats at the end of the run
    pub destinations: Vec<DestinationRoutingStats>,
}

impl RouteReport {
    /// Fold one routing outcome into the report
    pub fn record(&mut self, result: &RoutingResult) {
        self.processing_ms
            .push(result.processing_time.as_secs_f64() * 1000.0);

        match (
            result.success,
            result.routed_destinations.is_empty(),
            result.errors.is_empty(),
        ) {
            (false, _, _) => self.changes_failed += 1,
            (true, true, true) => self.changes_unrouted += 1,
            (true, false, true) => self.changes_routed += 1,
            (true, false, false) => self.changes_partial += 1,
            (true, true, false) => self.changes_failed += 1,
        }
    }

    /// Changes per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.changes_read as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// JSON form of the report
    pub fn to_json(&self) -> serde_json::Value {
        let processing = self.processing_ms.summary();
        serde_json::json!({
            "changes_read": self.changes_read,
            "changes_routed": self.changes_routed,
            "changes_partial": self.changes_partial,
            "changes_failed": self.changes_failed,
            "changes_unrouted": self.changes_unrouted,
            "cancelled": self.cancelled,
            "duration_secs": self.duration.as_secs_f64(),
            "throughput": self.throughput(),
            "processing_ms": {
                "count": processing.count,
                "min": processing.min,
                "max": processing.max,
                "mean": processing.mean,
                "std_dev": processing.std_dev,
            },
            "overall": self.overall,
            "destinations": self.destinations.iter().map(|d| serde_json::json!({
                "destination": d.destination,
                "total_deliveries": d.total_deliveries,
                "successful_deliveries": d.successful_deliveries,
                "failed_deliveries": d.failed_deliveries,
                "success_rate": d.success_rate(),
                "average_delivery_ms": d.average_delivery_time().as_secs_f64() * 1000.0,
            })).collect::<Vec<_>>(),
        })
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Routing Statistics                      ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Changes read: {}", self.changes_read);
        println!("   ├─ Fully routed: {}", self.changes_routed);
        println!("   ├─ Partially routed: {}", self.changes_partial);
        println!("   ├─ Failed: {}", self.changes_failed);
        println!("   ├─ Unrouted: {}", self.changes_unrouted);
        println!("   ├─ Throughput: {:.2} changes/s", self.throughput());
        println!("   └─ Processing (ms): {}", self.processing_ms.summary());

        if self.cancelled {
            println!("\n⚠️  Run was cancelled before the input was exhausted");
        }

        if !self.destinations.is_empty() {
            println!("\n📈 Destinations");
            for d in &self.destinations {
                println!(
                    "   ├─ {}: {}/{} delivered ({:.1}%), avg {:.2}ms",
                    d.destination,
                    d.successful_deliveries,
                    d.total_deliveries,
                    d.success_rate() * 100.0,
                    d.average_delivery_time().as_secs_f64() * 1000.0
                );
            }
        }

        println!("\n{}", self.overall);
    }
}
