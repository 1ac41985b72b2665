//! Routing metrics for observability
//!
//! Per-destination counters are plain atomics behind an `Arc`; the map lock
//! is only taken for writing the first time a destination name is seen.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

const NO_TIMESTAMP: i64 = i64::MIN;

/// Counters for a single destination
#[derive(Debug)]
struct DestinationMetrics {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    delivery_nanos: AtomicU64,
    last_success_ms: AtomicI64,
    last_failure_ms: AtomicI64,
    last_attempt_ms: AtomicI64,
}

impl Default for DestinationMetrics {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            delivery_nanos: AtomicU64::new(0),
            last_success_ms: AtomicI64::new(NO_TIMESTAMP),
            last_failure_ms: AtomicI64::new(NO_TIMESTAMP),
            last_attempt_ms: AtomicI64::new(NO_TIMESTAMP),
        }
    }
}

impl DestinationMetrics {
    fn record(&self, success: bool, delivery_time: Duration, at: DateTime<Utc>) {
        let at_ms = at.timestamp_millis();
        self.total.fetch_add(1, Ordering::Relaxed);
        self.delivery_nanos
            .fetch_add(duration_nanos(delivery_time), Ordering::Relaxed);
        self.last_attempt_ms.fetch_max(at_ms, Ordering::Relaxed);

        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
            self.last_success_ms.fetch_max(at_ms, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.last_failure_ms.fetch_max(at_ms, Ordering::Relaxed);
        }
    }

    fn snapshot(&self, name: &str) -> DestinationRoutingStats {
        DestinationRoutingStats {
            destination: name.to_string(),
            total_deliveries: self.total.load(Ordering::Relaxed),
            successful_deliveries: self.succeeded.load(Ordering::Relaxed),
            failed_deliveries: self.failed.load(Ordering::Relaxed),
            last_success: load_timestamp(&self.last_success_ms),
            last_failure: load_timestamp(&self.last_failure_ms),
            last_attempt: load_timestamp(&self.last_attempt_ms),
            total_delivery_time: Duration::from_nanos(self.delivery_nanos.load(Ordering::Relaxed)),
        }
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn load_timestamp(cell: &AtomicI64) -> Option<DateTime<Utc>> {
    match cell.load(Ordering::Relaxed) {
        NO_TIMESTAMP => None,
        ms => DateTime::from_timestamp_millis(ms),
    }
}

/// Snapshot of one destination's delivery history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationRoutingStats {
    pub destination: String,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub total_delivery_time: Duration,
}

impl DestinationRoutingStats {
    /// Successful / total, 0.0 before the first delivery
    pub fn success_rate(&self) -> f64 {
        if self.total_deliveries == 0 {
            0.0
        } else {
            self.successful_deliveries as f64 / self.total_deliveries as f64
        }
    }

    pub fn average_delivery_time(&self) -> Duration {
        match u32::try_from(self.total_deliveries) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_delivery_time / n,
            Err(_) => Duration::from_secs_f64(
                self.total_delivery_time.as_secs_f64() / self.total_deliveries as f64,
            ),
        }
    }
}

/// Engine-wide snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallRoutingStats {
    /// Delivery attempts (a change fanned out to three destinations counts three)
    pub total_changes_routed: u64,
    /// Engine-level (rule evaluation) failures
    pub total_routing_errors: u64,
    /// Completed `route_change` calls that reached delivery
    pub changes_processed: u64,
    pub successful_deliveries: u64,
    pub total_processing_time: Duration,
    pub average_processing_time: Duration,
    /// Individually tracked destinations
    pub destination_count: usize,
    /// Successful deliveries / attempts, 0.0 before the first attempt
    pub success_rate: f64,
}

impl fmt::Display for OverallRoutingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Routing Summary ===")?;
        writeln!(f, "Changes processed: {}", self.changes_processed)?;
        writeln!(f, "Delivery attempts: {}", self.total_changes_routed)?;
        writeln!(
            f,
            "Successful deliveries: {} ({:.2}%)",
            self.successful_deliveries,
            self.success_rate * 100.0
        )?;
        writeln!(f, "Routing errors: {}", self.total_routing_errors)?;
        writeln!(f, "Destinations: {}", self.destination_count)?;
        writeln!(
            f,
            "Average processing time: {:.3}ms",
            self.average_processing_time.as_secs_f64() * 1000.0
        )
    }
}

/// Per-destination and global routing counters
#[derive(Debug)]
pub struct RoutingMetrics {
    destinations: RwLock<HashMap<String, Arc<DestinationMetrics>>>,
    max_tracked_destinations: usize,
    /// Names refused because of the cap (warned once each)
    untracked: Mutex<HashSet<String>>,
    total_changes_routed: AtomicU64,
    successful_deliveries: AtomicU64,
    total_routing_errors: AtomicU64,
    changes_processed: AtomicU64,
    processing_nanos: AtomicU64,
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RoutingMetrics {
    pub fn new(max_tracked_destinations: usize) -> Self {
        Self {
            destinations: RwLock::new(HashMap::new()),
            max_tracked_destinations: max_tracked_destinations.max(1),
            untracked: Mutex::new(HashSet::new()),
            total_changes_routed: AtomicU64::new(0),
            successful_deliveries: AtomicU64::new(0),
            total_routing_errors: AtomicU64::new(0),
            changes_processed: AtomicU64::new(0),
            processing_nanos: AtomicU64::new(0),
        }
    }

    fn entry(&self, destination: &str) -> Option<Arc<DestinationMetrics>> {
        if let Some(existing) = self
            .destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
        {
            return Some(Arc::clone(existing));
        }

        let mut map = self
            .destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(destination) {
            return Some(Arc::clone(existing));
        }
        if map.len() >= self.max_tracked_destinations {
            drop(map);
            let newly_refused = self
                .untracked
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(destination.to_string());
            if newly_refused {
                warn!(
                    destination,
                    max = self.max_tracked_destinations,
                    "Destination metrics cap reached, not tracking individually"
                );
            }
            return None;
        }

        let created = Arc::new(DestinationMetrics::default());
        map.insert(destination.to_string(), Arc::clone(&created));
        Some(created)
    }

    /// Record one delivery attempt
    pub fn record_delivery(
        &self,
        destination: &str,
        success: bool,
        delivery_time: Duration,
        at: DateTime<Utc>,
    ) {
        self.total_changes_routed.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_deliveries.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(entry) = self.entry(destination) {
            entry.record(success, delivery_time, at);
        }
        observability::record_delivery(destination, success, delivery_time);
    }

    /// Record an engine-level failure
    pub fn record_routing_error(&self) {
        self.total_routing_errors.fetch_add(1, Ordering::Relaxed);
        observability::record_routing_error();
    }

    /// Record the processing time of a completed routing call
    pub fn record_processing_time(&self, elapsed: Duration) {
        self.changes_processed.fetch_add(1, Ordering::Relaxed);
        self.processing_nanos
            .fetch_add(duration_nanos(elapsed), Ordering::Relaxed);
        observability::record_processing_time(elapsed);
    }

    pub fn destination_stats(&self, destination: &str) -> Option<DestinationRoutingStats> {
        self.destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .map(|m| m.snapshot(destination))
    }

    /// Every tracked destination, sorted by name
    pub fn all_destination_stats(&self) -> Vec<DestinationRoutingStats> {
        let mut stats: Vec<_> = self
            .destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, m)| m.snapshot(name))
            .collect();
        stats.sort_by(|a, b| a.destination.cmp(&b.destination));
        stats
    }

    pub fn overall_stats(&self) -> OverallRoutingStats {
        let total_changes_routed = self.total_changes_routed.load(Ordering::Relaxed);
        let successful_deliveries = self.successful_deliveries.load(Ordering::Relaxed);
        let changes_processed = self.changes_processed.load(Ordering::Relaxed);
        let total_processing_time =
            Duration::from_nanos(self.processing_nanos.load(Ordering::Relaxed));

        let average_processing_time = if changes_processed == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(total_processing_time.as_secs_f64() / changes_processed as f64)
        };
        let success_rate = if total_changes_routed == 0 {
            0.0
        } else {
            successful_deliveries as f64 / total_changes_routed as f64
        };

        OverallRoutingStats {
            total_changes_routed,
            total_routing_errors: self.total_routing_errors.load(Ordering::Relaxed),
            changes_processed,
            successful_deliveries,
            total_processing_time,
            average_processing_time,
            destination_count: self
                .destinations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            success_rate,
        }
    }

    /// Reset every counter
    pub fn clear(&self) {
        self.destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.untracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.total_changes_routed.store(0, Ordering::Relaxed);
        self.successful_deliveries.store(0, Ordering::Relaxed);
        self.total_routing_errors.store(0, Ordering::Relaxed);
        self.changes_processed.store(0, Ordering::Relaxed);
        self.processing_nanos.store(0, Ordering::Relaxed);
    }
}
