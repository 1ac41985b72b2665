//! RoutingEngine - rule evaluation and fan-out to destinations

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use contracts::{ChangeRecord, Destination, EngineSettings};

use crate::error::RoutingError;
use crate::events::RoutingEvent;
use crate::handle::{panic_message, DeliveryOptions, DeliveryOutcome, DestinationHandle};
use crate::metrics::{DestinationRoutingStats, OverallRoutingStats, RoutingMetrics};
use crate::result::RoutingResult;
use crate::rules::RoutingRule;

/// Default worker queue capacity for programmatically added destinations
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fan-out cap for `route_changes`
    pub max_concurrent_changes: usize,
    /// Deliver one change to all of its destinations concurrently
    pub parallel_delivery: bool,
    /// Per-delivery budget, queueing included
    pub delivery_timeout: Option<Duration>,
    /// Time a destination worker gets to drain and dispose on shutdown
    pub shutdown_timeout: Duration,
    /// Event broadcast buffer
    pub event_capacity: usize,
    /// Metrics cap on individually tracked destinations
    pub max_tracked_destinations: usize,
    /// Worker queue capacity used by `add_destination`
    pub default_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_concurrent_changes: settings.max_concurrent_changes.max(1),
            parallel_delivery: settings.parallel_delivery,
            delivery_timeout: settings.delivery_timeout_ms.map(Duration::from_millis),
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms.max(1)),
            event_capacity: settings.event_capacity.max(1),
            max_tracked_destinations: settings.max_tracked_destinations.max(1),
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    rules: RwLock<Vec<Arc<dyn RoutingRule>>>,
    destinations: RwLock<HashMap<String, Arc<DestinationHandle>>>,
    metrics: RoutingMetrics,
    events: broadcast::Sender<RoutingEvent>,
    fan_out: Arc<Semaphore>,
    disposed: AtomicBool,
}

/// Resolved delivery target
enum Target {
    Missing(String),
    Found(Arc<DestinationHandle>),
}

/// Outcome of one delivery attempt
struct Attempt {
    success: bool,
    message: Option<String>,
    delivery_time: Duration,
}

enum Registration {
    Overwrite,
    RejectDuplicate,
}

/// Change router
///
/// Cloning is cheap; clones share rules, destinations and metrics.
#[derive(Clone)]
pub struct RoutingEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("config", &self.inner.config)
            .field("rules", &self.rule_names())
            .field("destinations", &self.destination_names())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RoutingEngine {
    /// Create an empty engine
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let fan_out = Arc::new(Semaphore::new(config.max_concurrent_changes.max(1)));
        let metrics = RoutingMetrics::new(config.max_tracked_destinations);

        Self {
            inner: Arc::new(EngineInner {
                config,
                rules: RwLock::new(Vec::new()),
                destinations: RwLock::new(HashMap::new()),
                metrics,
                events,
                fan_out,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn builder() -> RoutingEngineBuilder {
        RoutingEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &RoutingMetrics {
        &self.inner.metrics
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), RoutingError> {
        if self.is_disposed() {
            Err(RoutingError::Disposed)
        } else {
            Ok(())
        }
    }

    // ===== Registration =====

    /// Append a rule; rules are evaluated in registration order
    pub fn add_rule(&self, rule: impl RoutingRule + 'static) -> Result<(), RoutingError> {
        self.add_shared_rule(Arc::new(rule))
    }

    pub fn add_shared_rule(&self, rule: Arc<dyn RoutingRule>) -> Result<(), RoutingError> {
        let mut rules = self
            .inner
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.ensure_live()?;
        debug!(rule = rule.name(), priority = rule.priority(), "Rule registered");
        rules.push(rule);
        Ok(())
    }

    /// Register a destination, replacing any destination with the same name
    ///
    /// The replaced destination is drained and disposed.
    pub async fn add_destination<D: Destination + 'static>(
        &self,
        destination: D,
    ) -> Result<(), RoutingError> {
        let capacity = self.inner.config.default_queue_capacity;
        self.add_destination_with_capacity(destination, capacity)
            .await
    }

    pub async fn add_destination_with_capacity<D: Destination + 'static>(
        &self,
        destination: D,
        queue_capacity: usize,
    ) -> Result<(), RoutingError> {
        self.ensure_live()?;
        let handle = DestinationHandle::spawn(destination, queue_capacity);
        self.register(handle, Registration::Overwrite).await
    }

    /// Register a destination, failing if the name is already taken
    pub async fn try_add_destination<D: Destination + 'static>(
        &self,
        destination: D,
    ) -> Result<(), RoutingError> {
        self.ensure_live()?;
        let name = destination.name().to_string();
        if self.find_destination(&name).is_some() {
            return Err(RoutingError::DuplicateDestination { name });
        }
        let handle =
            DestinationHandle::spawn(destination, self.inner.config.default_queue_capacity);
        self.register(handle, Registration::RejectDuplicate).await
    }

    /// Register an already running destination worker, replacing by name
    pub async fn add_destination_handle(
        &self,
        handle: DestinationHandle,
    ) -> Result<(), RoutingError> {
        self.register(handle, Registration::Overwrite).await
    }

    async fn register(
        &self,
        handle: DestinationHandle,
        mode: Registration,
    ) -> Result<(), RoutingError> {
        let name = handle.name().to_string();
        let handle = Arc::new(handle);

        let outcome = {
            let mut destinations = self
                .inner
                .destinations
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.is_disposed() {
                Err(RoutingError::Disposed)
            } else if matches!(mode, Registration::RejectDuplicate)
                && destinations.contains_key(&name)
            {
                Err(RoutingError::DuplicateDestination { name: name.clone() })
            } else {
                Ok(destinations.insert(name.clone(), Arc::clone(&handle)))
            }
        };

        match outcome {
            Ok(Some(replaced)) => {
                warn!(destination = %name, "Destination re-registered, disposing the previous one");
                replaced
                    .shutdown_within(self.inner.config.shutdown_timeout)
                    .await;
                Ok(())
            }
            Ok(None) => {
                debug!(destination = %name, destination_type = %handle.destination_type(), "Destination registered");
                Ok(())
            }
            Err(e) => {
                handle
                    .shutdown_within(self.inner.config.shutdown_timeout)
                    .await;
                Err(e)
            }
        }
    }

    /// Open or close a destination's delivery gate
    pub async fn set_destination_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<(), RoutingError> {
        self.ensure_live()?;
        let handle = self
            .find_destination(name)
            .ok_or_else(|| RoutingError::DestinationNotFound {
                name: name.to_string(),
            })?;
        handle.set_enabled(enabled).await?;
        info!(destination = name, enabled, "Destination gate changed");
        Ok(())
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.inner
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Registered destination names, sorted
    pub fn destination_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn find_destination(&self, name: &str) -> Option<Arc<DestinationHandle>> {
        self.inner
            .destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn rules_snapshot(&self) -> Vec<Arc<dyn RoutingRule>> {
        self.inner
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ===== Routing =====

    /// Route one change to every destination named by a matching rule
    ///
    /// # Errors
    /// Only `Disposed`. Rule and destination failures are reported in the
    /// returned [`RoutingResult`].
    pub async fn route_change(
        &self,
        change: &ChangeRecord,
        table: &str,
    ) -> Result<RoutingResult, RoutingError> {
        self.route(Arc::new(change.clone()), Arc::from(table), None)
            .await
    }

    /// Like [`route_change`](Self::route_change), honoring a cancellation token
    ///
    /// # Errors
    /// `Cancelled` when the token fires during rule evaluation. Once
    /// delivery has started, cancellation skips every destination that has
    /// not been invoked yet and the partial result is returned. Deliveries
    /// already in progress are awaited, bounded by `delivery_timeout`.
    pub async fn route_change_with_cancel(
        &self,
        change: &ChangeRecord,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<RoutingResult, RoutingError> {
        self.route(Arc::new(change.clone()), Arc::from(table), Some(cancel))
            .await
    }

    /// Route a batch concurrently, bounded by `max_concurrent_changes`
    ///
    /// Results are in input order. An empty batch or table name yields an
    /// empty list.
    #[instrument(name = "routing_engine_route_changes", skip_all, fields(table = %table, count = changes.len()))]
    pub async fn route_changes(
        &self,
        changes: &[ChangeRecord],
        table: &str,
    ) -> Result<Vec<RoutingResult>, RoutingError> {
        if changes.is_empty() || table.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_live()?;

        let table: Arc<str> = Arc::from(table);
        let mut tasks = Vec::with_capacity(changes.len());
        for change in changes {
            let permit = Arc::clone(&self.inner.fan_out)
                .acquire_owned()
                .await
                .map_err(|_| RoutingError::Disposed)?;
            let engine = self.clone();
            let change = Arc::new(change.clone());
            let table = Arc::clone(&table);
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                engine.route(change, table, None).await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(task.await??);
        }
        Ok(results)
    }

    #[instrument(name = "routing_engine_route", skip_all, fields(change_id = %change.id, table = %table))]
    async fn route(
        &self,
        change: Arc<ChangeRecord>,
        table: Arc<str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<RoutingResult, RoutingError> {
        self.ensure_live()?;
        let started = Instant::now();
        let mut result = RoutingResult::new(change.id.clone(), &*table);
        observability::record_change_received(&table);

        // All rules are evaluated before anything is delivered
        let mut names = Vec::new();
        for rule in self.rules_snapshot() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(RoutingError::Cancelled);
            }
            match evaluate_rule(rule.as_ref(), &change, &table) {
                Ok(Some(destinations)) => {
                    debug!(rule = rule.name(), destinations = ?destinations, "Rule matched");
                    names.extend(destinations);
                }
                Ok(None) => {}
                Err(message) => {
                    error!(rule = rule.name(), error = %message, "Rule evaluation failed");
                    self.inner.metrics.record_routing_error();
                    result.fail(format!("Routing failed: {message}"));
                    result.processing_time = started.elapsed();
                    return Ok(result);
                }
            }
        }

        let targets: Vec<Target> = names
            .into_iter()
            .map(|name| match self.find_destination(&name) {
                Some(handle) => Target::Found(handle),
                None => Target::Missing(name),
            })
            .collect();

        let attempts = if self.inner.config.parallel_delivery {
            self.deliver_parallel(&targets, &change, &table, cancel)
                .await
        } else {
            self.deliver_sequential(&targets, &change, &table, cancel)
                .await
        };

        let mut skipped = 0usize;
        for (target, attempt) in targets.iter().zip(attempts) {
            match (target, attempt) {
                (Target::Missing(name), _) => {
                    warn!(destination = %name, "Destination not found");
                    observability::record_destination_not_found(name);
                    result.errors.push(format!("Destination not found: {name}"));
                }
                (Target::Found(_), None) => skipped += 1,
                (Target::Found(handle), Some(attempt)) => {
                    let name = handle.name();
                    self.inner.metrics.record_delivery(
                        name,
                        attempt.success,
                        attempt.delivery_time,
                        Utc::now(),
                    );
                    if attempt.success {
                        result.routed_destinations.push(name.to_string());
                    } else {
                        let message = attempt
                            .message
                            .unwrap_or_else(|| "unknown error".to_string());
                        warn!(destination = name, error = %message, "Delivery failed");
                        result
                            .errors
                            .push(format!("Delivery to {name} failed: {message}"));
                    }
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, "Routing cancelled during delivery");
            result
                .errors
                .push(format!("Routing cancelled: {skipped} destination(s) skipped"));
        }

        result.processing_time = started.elapsed();
        self.inner
            .metrics
            .record_processing_time(result.processing_time);
        self.publish(&result);

        Ok(result)
    }

    fn delivery_options(&self, cancel: Option<&CancellationToken>) -> DeliveryOptions {
        DeliveryOptions {
            cancel: cancel.cloned(),
            timeout: self.inner.config.delivery_timeout,
        }
    }

    /// One entry per target; `None` for targets never handed to a destination
    async fn deliver_sequential(
        &self,
        targets: &[Target],
        change: &Arc<ChangeRecord>,
        table: &Arc<str>,
        cancel: Option<&CancellationToken>,
    ) -> Vec<Option<Attempt>> {
        let mut attempts = Vec::with_capacity(targets.len());

        for target in targets {
            let Target::Found(handle) = target else {
                attempts.push(None);
                continue;
            };
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                attempts.push(None);
                continue;
            }
            let attempt = deliver_one(
                handle,
                Arc::clone(change),
                Arc::clone(table),
                self.delivery_options(cancel),
            )
            .await;
            attempts.push(attempt);
        }
        attempts
    }

    async fn deliver_parallel(
        &self,
        targets: &[Target],
        change: &Arc<ChangeRecord>,
        table: &Arc<str>,
        cancel: Option<&CancellationToken>,
    ) -> Vec<Option<Attempt>> {
        let mut attempts: Vec<Option<Attempt>> = targets.iter().map(|_| None).collect();

        let mut set = JoinSet::new();
        for (index, target) in targets.iter().enumerate() {
            if let Target::Found(handle) = target {
                let handle = Arc::clone(handle);
                let change = Arc::clone(change);
                let table = Arc::clone(table);
                let options = self.delivery_options(cancel);
                set.spawn(async move { (index, deliver_one(&handle, change, table, options).await) });
            }
        }

        // Cancellation is handled per request, so every task is joined
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, attempt)) => attempts[index] = attempt,
                Err(e) => error!(error = %e, "Delivery task failed"),
            }
        }
        attempts
    }

    fn publish(&self, result: &RoutingResult) {
        // Sending fails only when nobody is subscribed
        if !result.routed_destinations.is_empty() {
            let _ = self
                .inner
                .events
                .send(RoutingEvent::ChangeRouted(result.clone()));
        }
        if !result.errors.is_empty() {
            let _ = self
                .inner
                .events
                .send(RoutingEvent::RoutingFailed(result.clone()));
        }
        let _ = self.inner.events.send(RoutingEvent::RoutingMetricsUpdated(
            self.inner.metrics.overall_stats(),
        ));
    }

    // ===== Observability =====

    /// Receive routing events emitted after each routed change
    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.inner.events.subscribe()
    }

    pub fn get_destination_stats(&self, name: &str) -> Option<DestinationRoutingStats> {
        self.inner.metrics.destination_stats(name)
    }

    pub fn get_overall_stats(&self) -> OverallRoutingStats {
        self.inner.metrics.overall_stats()
    }

    pub fn all_destination_stats(&self) -> Vec<DestinationRoutingStats> {
        self.inner.metrics.all_destination_stats()
    }

    pub fn clear_metrics(&self) {
        self.inner.metrics.clear();
    }

    // ===== Shutdown =====

    /// Dispose every registered destination exactly once
    ///
    /// Idempotent. Afterwards every mutating or routing call fails with
    /// [`RoutingError::Disposed`].
    #[instrument(name = "routing_engine_dispose", skip(self))]
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.fan_out.close();

        let handles: Vec<Arc<DestinationHandle>> = self
            .inner
            .destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        self.inner
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let count = handles.len();
        let timeout = self.inner.config.shutdown_timeout;
        join_all(handles.iter().map(|handle| handle.shutdown_within(timeout))).await;
        info!(destinations = count, "Routing engine disposed");
    }
}

/// Evaluate a rule, turning errors and panics into a message
fn evaluate_rule(
    rule: &dyn RoutingRule,
    change: &ChangeRecord,
    table: &str,
) -> Result<Option<Vec<String>>, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(change, table))) {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!(
            "rule '{}' panicked: {}",
            rule.name(),
            panic_message(payload.as_ref())
        )),
    }
}

/// `None` when the request was cancelled before the destination saw it
async fn deliver_one(
    handle: &DestinationHandle,
    change: Arc<ChangeRecord>,
    table: Arc<str>,
    options: DeliveryOptions,
) -> Option<Attempt> {
    let started = Instant::now();
    match handle.deliver_with(change, table, options).await {
        DeliveryOutcome::Skipped => None,
        DeliveryOutcome::Completed(Ok(delivery)) => Some(Attempt {
            success: delivery.success,
            message: delivery.error_message,
            delivery_time: delivery.delivery_time,
        }),
        DeliveryOutcome::Completed(Err(e)) => Some(Attempt {
            success: false,
            message: Some(e.to_string()),
            delivery_time: started.elapsed(),
        }),
    }
}

type PendingDestination = Box<dyn FnOnce() -> DestinationHandle + Send>;

/// Builder for a pre-populated [`RoutingEngine`]
#[derive(Default)]
pub struct RoutingEngineBuilder {
    config: EngineConfig,
    rules: Vec<Arc<dyn RoutingRule>>,
    destinations: Vec<PendingDestination>,
}

impl RoutingEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrent_changes(mut self, limit: usize) -> Self {
        self.config.max_concurrent_changes = limit.max(1);
        self
    }

    pub fn parallel_delivery(mut self, enabled: bool) -> Self {
        self.config.parallel_delivery = enabled;
        self
    }

    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = Some(timeout);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn rule(mut self, rule: impl RoutingRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn shared_rule(mut self, rule: Arc<dyn RoutingRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Destination workers are spawned by [`build`](Self::build)
    pub fn destination<D: Destination + 'static>(mut self, destination: D) -> Self {
        let capacity = self.config.default_queue_capacity;
        self.destinations
            .push(Box::new(move || DestinationHandle::spawn(destination, capacity)));
        self
    }

    /// Spawn destination workers and assemble the engine
    #[instrument(name = "routing_engine_builder_build", skip(self), fields(rules = self.rules.len(), destinations = self.destinations.len()))]
    pub async fn build(self) -> Result<RoutingEngine, RoutingError> {
        let engine = RoutingEngine::new(self.config);
        for rule in self.rules {
            engine.add_shared_rule(rule)?;
        }
        for spawn in self.destinations {
            engine.add_destination_handle(spawn()).await?;
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{CustomRule, FrequencyRule, TableRule};
    use contracts::{
        ChangeOperation, ContractError, DeliveryResult, DestinationType, TableMatchMode,
        DESTINATION_DISABLED_MESSAGE,
    };
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use tokio::time::sleep;

    #[derive(Clone, Default)]
    struct Tracker {
        delivered: Arc<Mutex<Vec<String>>>,
        disposed: Arc<AtomicU64>,
    }

    impl Tracker {
        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }

        fn disposed(&self) -> u64 {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    enum Behavior {
        Succeed,
        Reject(&'static str),
        Raise(&'static str),
        Hang,
        Slow(u64),
    }

    struct TestDestination {
        name: String,
        enabled: bool,
        behavior: Behavior,
        tracker: Tracker,
    }

    impl TestDestination {
        fn new(name: &str, tracker: &Tracker) -> Self {
            Self {
                name: name.to_string(),
                enabled: true,
                behavior: Behavior::Succeed,
                tracker: tracker.clone(),
            }
        }

        fn behave(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }
    }

    impl Destination for TestDestination {
        fn name(&self) -> &str {
            &self.name
        }

        fn destination_type(&self) -> DestinationType {
            DestinationType::Webhook
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }

        async fn deliver(
            &mut self,
            change: &ChangeRecord,
            _table: &str,
        ) -> Result<DeliveryResult, ContractError> {
            if !self.enabled {
                return Ok(DeliveryResult::disabled());
            }
            match self.behavior {
                Behavior::Succeed => {}
                Behavior::Reject(message) => return Ok(DeliveryResult::failure(message)),
                Behavior::Raise(message) => {
                    return Err(ContractError::destination(&self.name, message))
                }
                Behavior::Hang => std::future::pending::<()>().await,
                Behavior::Slow(ms) => sleep(Duration::from_millis(ms)).await,
            }
            self.tracker
                .delivered
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, change.id));
            Ok(DeliveryResult::success(Duration::from_millis(1)))
        }

        async fn dispose(&mut self) -> Result<(), ContractError> {
            self.tracker.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn change(id: &str) -> ChangeRecord {
        ChangeRecord::new(id, ChangeOperation::Insert, "0/1")
    }

    fn table_rule(name: &str, table: &str, destinations: &[&str]) -> TableRule {
        TableRule::new(
            name,
            [table],
            TableMatchMode::Exact,
            destinations.iter().copied(),
        )
    }

    #[tokio::test]
    async fn test_table_rule_routes_to_webhook() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine
            .add_rule(table_rule("orders", "orders", &["webhook-1"]))
            .unwrap();
        engine
            .add_destination(TestDestination::new("webhook-1", &tracker))
            .await
            .unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert!(result.success);
        assert_eq!(result.routed_destinations, vec!["webhook-1"]);
        assert!(result.errors.is_empty());
        assert_eq!(result.change_id, "c1");
        assert_eq!(result.table_name, "orders");
        assert_eq!(tracker.delivered(), vec!["webhook-1:c1"]);
    }

    #[tokio::test]
    async fn test_no_matching_rule() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine
            .add_rule(table_rule("orders", "orders", &["d1"]))
            .unwrap();
        engine
            .add_destination(TestDestination::new("d1", &tracker))
            .await
            .unwrap();

        let result = engine.route_change(&change("c1"), "users").await.unwrap();

        assert!(result.success);
        assert!(result.routed_destinations.is_empty());
        assert!(result.errors.is_empty());
        assert!(tracker.delivered().is_empty());
        assert_eq!(engine.get_overall_stats().changes_processed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_targets_are_not_deduplicated() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine.add_rule(table_rule("a", "orders", &["d1"])).unwrap();
        engine.add_rule(table_rule("b", "orders", &["d1"])).unwrap();
        engine
            .add_destination(TestDestination::new("d1", &tracker))
            .await
            .unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert_eq!(result.routed_destinations, vec!["d1", "d1"]);
        assert_eq!(
            engine.get_destination_stats("d1").unwrap().total_deliveries,
            2
        );
        assert_eq!(engine.get_overall_stats().total_changes_routed, 2);
    }

    #[tokio::test]
    async fn test_missing_destination_is_reported_without_metrics() {
        let engine = RoutingEngine::default();
        engine
            .add_rule(table_rule("orders", "orders", &["d-missing"]))
            .unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert!(result.success);
        assert_eq!(result.errors, vec!["Destination not found: d-missing"]);
        assert!(engine.get_destination_stats("d-missing").is_none());
        assert_eq!(engine.get_overall_stats().total_changes_routed, 0);
    }

    #[tokio::test]
    async fn test_failing_rule_aborts_routing() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine.add_rule(table_rule("ok", "orders", &["d1"])).unwrap();
        engine
            .add_rule(CustomRule::fallible("broken", ["d1"], |_, _| {
                Err::<bool, _>("boom")
            }))
            .unwrap();
        engine
            .add_shared_rule(Arc::new(ExplodingRule))
            .unwrap();
        engine
            .add_destination(TestDestination::new("d1", &tracker))
            .await
            .unwrap();
        let mut events = engine.subscribe();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Routing failed: "));
        assert!(result.routed_destinations.is_empty());
        assert!(tracker.delivered().is_empty());
        assert!(events.try_recv().is_err());

        let overall = engine.get_overall_stats();
        assert_eq!(overall.total_routing_errors, 1);
        assert_eq!(overall.total_changes_routed, 0);
        assert!(engine.get_destination_stats("d1").is_none());
    }

    /// Rule that reports an evaluation error
    struct ExplodingRule;

    impl RoutingRule for ExplodingRule {
        fn name(&self) -> &str {
            "exploding"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn should_apply(&self, _: &ChangeRecord, _: &str) -> Result<bool, ContractError> {
            Err(ContractError::rule_evaluation("exploding", "bad state"))
        }

        fn destinations(&self, _: &ChangeRecord, _: &str) -> Vec<String> {
            vec!["d1".to_string()]
        }
    }

    struct PanickingRule;

    impl RoutingRule for PanickingRule {
        fn name(&self) -> &str {
            "panicking"
        }

        fn priority(&self) -> i32 {
            0
        }

        fn should_apply(&self, _: &ChangeRecord, _: &str) -> Result<bool, ContractError> {
            panic!("rule blew up")
        }

        fn destinations(&self, _: &ChangeRecord, _: &str) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_panicking_rule_is_engine_failure() {
        let engine = RoutingEngine::default();
        engine.add_rule(PanickingRule).unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert!(!result.success);
        assert_eq!(
            result.errors,
            vec!["Routing failed: rule 'panicking' panicked: rule blew up"]
        );
        assert_eq!(engine.get_overall_stats().total_routing_errors, 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine
            .add_rule(table_rule("fan", "orders", &["bad", "raise", "good"]))
            .unwrap();
        engine
            .add_destination(TestDestination::new("bad", &tracker).behave(Behavior::Reject("503")))
            .await
            .unwrap();
        engine
            .add_destination(
                TestDestination::new("raise", &tracker).behave(Behavior::Raise("socket closed")),
            )
            .await
            .unwrap();
        engine
            .add_destination(TestDestination::new("good", &tracker))
            .await
            .unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert!(result.success);
        assert!(result.is_partial_failure());
        assert_eq!(result.routed_destinations, vec!["good"]);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0], "Delivery to bad failed: 503");
        assert!(result.errors[1].starts_with("Delivery to raise failed: "));
        assert!(result.errors[1].contains("socket closed"));

        assert_eq!(
            engine.get_destination_stats("bad").unwrap().failed_deliveries,
            1
        );
        assert_eq!(
            engine.get_destination_stats("good").unwrap().successful_deliveries,
            1
        );
    }

    #[tokio::test]
    async fn test_disabled_destination() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine.add_rule(table_rule("r", "orders", &["d1"])).unwrap();
        engine
            .add_destination(TestDestination::new("d1", &tracker))
            .await
            .unwrap();
        engine.set_destination_enabled("d1", false).await.unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert!(tracker.delivered().is_empty());
        assert!(result.errors[0].contains(DESTINATION_DISABLED_MESSAGE));
        let stats = engine.get_destination_stats("d1").unwrap();
        assert_eq!(stats.failed_deliveries, 1);
        assert!(stats.last_failure.is_some());

        assert!(matches!(
            engine.set_destination_enabled("nope", true).await,
            Err(RoutingError::DestinationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_success_rate_and_processing_time() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine
            .add_rule(table_rule("r", "orders", &["ok", "ko"]))
            .unwrap();
        engine
            .add_destination(TestDestination::new("ok", &tracker))
            .await
            .unwrap();
        engine
            .add_destination(TestDestination::new("ko", &tracker).behave(Behavior::Reject("no")))
            .await
            .unwrap();

        for i in 0..3 {
            engine
                .route_change(&change(&format!("c{i}")), "orders")
                .await
                .unwrap();
        }

        let overall = engine.get_overall_stats();
        assert_eq!(overall.total_changes_routed, 6);
        assert_eq!(overall.changes_processed, 3);
        assert_eq!(overall.destination_count, 2);
        assert!((overall.success_rate - 0.5).abs() < 1e-12);
        assert!(overall.total_processing_time >= overall.average_processing_time);

        engine.clear_metrics();
        assert_eq!(engine.get_overall_stats().total_changes_routed, 0);
        assert!(engine.all_destination_stats().is_empty());
    }

    #[tokio::test]
    async fn test_event_order() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine
            .add_rule(table_rule("r", "orders", &["d1", "missing"]))
            .unwrap();
        engine
            .add_destination(TestDestination::new("d1", &tracker))
            .await
            .unwrap();
        let mut events = engine.subscribe();

        engine.route_change(&change("c1"), "orders").await.unwrap();
        engine.route_change(&change("c2"), "users").await.unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "change_routed",
                "routing_failed",
                "routing_metrics_updated",
                "routing_metrics_updated",
            ]
        );
    }

    #[tokio::test]
    async fn test_route_changes_preserves_order() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .max_concurrent_changes(3)
            .rule(table_rule("r", "orders", &["slow"]))
            .destination(TestDestination::new("slow", &tracker).behave(Behavior::Slow(5)))
            .build()
            .await
            .unwrap();

        let batch: Vec<_> = (0..10).map(|i| change(&format!("c{i}"))).collect();
        let results = engine.route_changes(&batch, "orders").await.unwrap();

        let ids: Vec<_> = results.iter().map(|r| r.change_id.as_str()).collect();
        let expected: Vec<_> = batch.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert!(results.iter().all(|r| r.routed_destinations == vec!["slow"]));

        assert!(engine.route_changes(&[], "orders").await.unwrap().is_empty());
        assert!(engine.route_changes(&batch, "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_frequency_rule_under_concurrency() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .max_concurrent_changes(8)
            .rule(FrequencyRule::new("throttle", 5, ["d1"]))
            .destination(TestDestination::new("d1", &tracker))
            .build()
            .await
            .unwrap();

        let batch: Vec<_> = (0..20).map(|i| change(&format!("c{i}"))).collect();
        let results = engine.route_changes(&batch, "orders").await.unwrap();

        let routed = results
            .iter()
            .filter(|r| !r.routed_destinations.is_empty())
            .count();
        assert_eq!(routed, 5);
        assert_eq!(tracker.delivered().len(), 5);
    }

    #[tokio::test]
    async fn test_parallel_delivery_keeps_order() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .parallel_delivery(true)
            .rule(table_rule("r", "orders", &["slow", "missing", "fast", "bad"]))
            .destination(TestDestination::new("slow", &tracker).behave(Behavior::Slow(30)))
            .destination(TestDestination::new("fast", &tracker))
            .destination(TestDestination::new("bad", &tracker).behave(Behavior::Reject("nope")))
            .build()
            .await
            .unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert_eq!(result.routed_destinations, vec!["slow", "fast"]);
        assert_eq!(
            result.errors,
            vec![
                "Destination not found: missing",
                "Delivery to bad failed: nope",
            ]
        );
    }

    #[tokio::test]
    async fn test_delivery_timeout() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .delivery_timeout(Duration::from_millis(20))
            .rule(table_rule("r", "orders", &["stuck"]))
            .destination(TestDestination::new("stuck", &tracker).behave(Behavior::Hang))
            .build()
            .await
            .unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();

        assert!(result.routed_destinations.is_empty());
        assert!(result.errors[0].starts_with("Delivery to stuck failed: "));
        assert!(result.errors[0].contains("timed out"));
        assert_eq!(
            engine.get_destination_stats("stuck").unwrap().failed_deliveries,
            1
        );
    }

    #[tokio::test]
    async fn test_cancellation_before_rules() {
        let engine = RoutingEngine::default();
        engine.add_rule(table_rule("r", "orders", &["d1"])).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = engine
            .route_change_with_cancel(&change("c1"), "orders", &token)
            .await;
        assert!(matches!(outcome, Err(RoutingError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellation_during_delivery() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine
            .add_rule(table_rule("r", "orders", &["fast", "slow", "never"]))
            .unwrap();
        engine
            .add_destination(TestDestination::new("fast", &tracker))
            .await
            .unwrap();
        engine
            .add_destination(TestDestination::new("slow", &tracker).behave(Behavior::Slow(100)))
            .await
            .unwrap();
        engine
            .add_destination(TestDestination::new("never", &tracker))
            .await
            .unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let result = engine
            .route_change_with_cancel(&change("c1"), "orders", &token)
            .await
            .unwrap();

        // The in-flight delivery finishes and is counted; only `never` is skipped
        assert_eq!(result.routed_destinations, vec!["fast", "slow"]);
        assert_eq!(
            result.errors,
            vec!["Routing cancelled: 1 destination(s) skipped"]
        );
        assert_eq!(tracker.delivered(), vec!["fast:c1", "slow:c1"]);
        let slow = engine.get_destination_stats("slow").unwrap();
        assert_eq!(slow.total_deliveries, 1);
        assert_eq!(slow.successful_deliveries, 1);
        assert!(engine.get_destination_stats("never").is_none());
    }

    #[tokio::test]
    async fn test_parallel_cancellation_skips_queued_requests() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .parallel_delivery(true)
            .rule(table_rule("r", "orders", &["slow", "slow"]))
            .destination(TestDestination::new("slow", &tracker).behave(Behavior::Slow(80)))
            .build()
            .await
            .unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let result = engine
            .route_change_with_cancel(&change("c1"), "orders", &token)
            .await
            .unwrap();

        assert_eq!(result.routed_destinations, vec!["slow"]);
        assert_eq!(
            result.errors,
            vec!["Routing cancelled: 1 destination(s) skipped"]
        );
        assert_eq!(tracker.delivered(), vec!["slow:c1"]);
        assert_eq!(
            engine.get_destination_stats("slow").unwrap().total_deliveries,
            1
        );
    }

    #[tokio::test]
    async fn test_dispose_after_timed_out_delivery() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .delivery_timeout(Duration::from_millis(20))
            .rule(table_rule("r", "orders", &["stuck"]))
            .destination(TestDestination::new("stuck", &tracker).behave(Behavior::Hang))
            .build()
            .await
            .unwrap();

        let result = engine.route_change(&change("c1"), "orders").await.unwrap();
        assert!(result.errors[0].contains("timed out"));

        let disposed = tokio::time::timeout(Duration::from_secs(2), engine.dispose()).await;
        assert!(disposed.is_ok());
        assert_eq!(tracker.disposed(), 1);
    }

    #[tokio::test]
    async fn test_dispose_aborts_hung_destination() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .shutdown_timeout(Duration::from_millis(50))
            .rule(table_rule("r", "orders", &["stuck"]))
            .destination(TestDestination::new("stuck", &tracker).behave(Behavior::Hang))
            .destination(TestDestination::new("idle", &tracker))
            .build()
            .await
            .unwrap();

        let routing = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.route_change(&change("c1"), "orders").await })
        };
        sleep(Duration::from_millis(10)).await;

        let disposed = tokio::time::timeout(Duration::from_secs(2), engine.dispose()).await;
        assert!(disposed.is_ok());
        // `idle` drained normally, `stuck` was aborted
        assert_eq!(tracker.disposed(), 1);

        let result = routing.await.unwrap().unwrap();
        assert!(result.routed_destinations.is_empty());
        assert!(result.errors[0].contains("worker terminated"));
    }

    #[tokio::test]
    async fn test_overwrite_disposes_previous() {
        let first = Tracker::default();
        let second = Tracker::default();
        let engine = RoutingEngine::default();
        engine.add_rule(table_rule("r", "orders", &["d1"])).unwrap();

        engine
            .add_destination(TestDestination::new("d1", &first))
            .await
            .unwrap();
        engine
            .add_destination(TestDestination::new("d1", &second))
            .await
            .unwrap();
        assert_eq!(first.disposed(), 1);

        engine.route_change(&change("c1"), "orders").await.unwrap();
        assert!(first.delivered().is_empty());
        assert_eq!(second.delivered(), vec!["d1:c1"]);

        let third = Tracker::default();
        let err = engine
            .try_add_destination(TestDestination::new("d1", &third))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::DuplicateDestination { .. }));
        assert_eq!(engine.destination_names(), vec!["d1"]);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::default();
        engine.add_rule(table_rule("r", "orders", &["a", "b"])).unwrap();
        engine
            .add_destination(TestDestination::new("a", &tracker))
            .await
            .unwrap();
        engine
            .add_destination(TestDestination::new("b", &tracker))
            .await
            .unwrap();

        engine.dispose().await;
        engine.dispose().await;

        assert_eq!(tracker.disposed(), 2);
        assert!(engine.is_disposed());
        assert!(matches!(
            engine.route_change(&change("c1"), "orders").await,
            Err(RoutingError::Disposed)
        ));
        assert!(matches!(
            engine.route_changes(&[change("c1")], "orders").await,
            Err(RoutingError::Disposed)
        ));
        assert!(matches!(
            engine.add_rule(table_rule("late", "orders", &["a"])),
            Err(RoutingError::Disposed)
        ));
        assert!(matches!(
            engine.add_destination(TestDestination::new("late", &tracker)).await,
            Err(RoutingError::Disposed)
        ));
        assert_eq!(tracker.disposed(), 2);
    }

    #[tokio::test]
    async fn test_rule_and_destination_names() {
        let tracker = Tracker::default();
        let engine = RoutingEngine::builder()
            .rule(table_rule("second", "b", &["z"]))
            .rule(table_rule("first", "a", &["y"]))
            .destination(TestDestination::new("z", &tracker))
            .destination(TestDestination::new("y", &tracker))
            .build()
            .await
            .unwrap();

        assert_eq!(engine.rule_names(), vec!["second", "first"]);
        assert_eq!(engine.destination_names(), vec!["y", "z"]);
    }

    #[test]
    fn test_engine_config_from_settings() {
        let settings = EngineSettings {
            delivery_timeout_ms: Some(250),
            parallel_delivery: true,
            ..EngineSettings::default()
        };
        let config = EngineConfig::from(&settings);

        assert_eq!(config.delivery_timeout, Some(Duration::from_millis(250)));
        assert!(config.parallel_delivery);
        assert_eq!(config.max_concurrent_changes, 64);
        assert_eq!(config.default_queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }
}
