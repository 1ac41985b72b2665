//! Engine assembly from a `RoutingConfig`

use contracts::{Destination, DestinationConfig, DestinationKind, RoutingConfig};
use tracing::{info, instrument};

use crate::clock::{SharedClock, SystemClock};
use crate::destinations::{FileDestination, LogDestination};
use crate::engine::{EngineConfig, RoutingEngine};
use crate::error::RoutingError;
use crate::handle::DestinationHandle;
use crate::rules::build_rule;

/// Create a destination worker from configuration
#[instrument(
    name = "routing_create_destination_handle",
    skip(config),
    fields(destination = %config.name, destination_type = ?config.destination_type)
)]
pub fn create_destination_handle(
    config: &DestinationConfig,
) -> Result<DestinationHandle, RoutingError> {
    let handle = match config.destination_type {
        DestinationKind::Log => {
            let mut destination = LogDestination::new(&config.name);
            destination.set_enabled(config.enabled);
            DestinationHandle::spawn(destination, config.queue_capacity)
        }
        DestinationKind::File => {
            let mut destination = FileDestination::from_params(&config.name, &config.params)
                .map_err(|e| RoutingError::destination_creation(&config.name, e.to_string()))?;
            destination.set_enabled(config.enabled);
            DestinationHandle::spawn(destination, config.queue_capacity)
        }
    };
    Ok(handle)
}

/// Build a ready-to-route engine from configuration
///
/// Must be called inside a tokio runtime.
pub async fn create_engine(config: &RoutingConfig) -> Result<RoutingEngine, RoutingError> {
    create_engine_with_clock(config, SystemClock::shared()).await
}

/// Like [`create_engine`], with time-dependent rules reading `clock`
#[instrument(
    name = "routing_create_engine",
    skip(config, clock),
    fields(rules = config.rules.len(), destinations = config.destinations.len())
)]
pub async fn create_engine_with_clock(
    config: &RoutingConfig,
    clock: SharedClock,
) -> Result<RoutingEngine, RoutingError> {
    // Build every rule before spawning any destination worker
    let rules = config
        .rules
        .iter()
        .map(|rule| build_rule(rule, &clock))
        .collect::<Result<Vec<_>, _>>()?;

    let engine = RoutingEngine::new(EngineConfig::from(&config.engine));
    for rule in rules {
        engine.add_shared_rule(rule)?;
    }

    for destination in &config.destinations {
        match create_destination_handle(destination) {
            Ok(handle) => engine.add_destination_handle(handle).await?,
            Err(e) => {
                engine.dispose().await;
                return Err(e);
            }
        }
    }

    info!(
        rules = engine.rule_names().len(),
        destinations = engine.destination_names().len(),
        "Routing engine created"
    );
    Ok(engine)
}
