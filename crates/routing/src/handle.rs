//! DestinationHandle - runs a destination in its own worker task
//!
//! The engine never touches a destination directly. Every call goes through
//! a bounded command queue, so a slow destination only backs up its own
//! queue and a panicking destination only fails its own deliveries.
//!
//! A delivery request carries its own cancellation token and deadline. The
//! worker drops requests that were cancelled before it reached them, and a
//! request it has started always gets an answer, so callers never report a
//! delivery that happened as skipped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use contracts::{ChangeRecord, ContractError, DeliveryResult, Destination, DestinationType};

/// Shutdown budget used by [`DestinationHandle::shutdown`]
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Limits attached to one delivery request
#[derive(Debug, Clone, Default)]
pub struct DeliveryOptions {
    /// Requests not yet started when this fires are skipped
    pub cancel: Option<CancellationToken>,
    /// Budget covering queueing and the destination call
    pub timeout: Option<Duration>,
}

/// What became of one delivery request
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The destination answered, or the request failed before reaching it
    Completed(Result<DeliveryResult, ContractError>),
    /// Cancelled before the destination saw the change
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    fn expired(&self, destination: &str) -> ContractError {
        ContractError::destination(
            destination,
            format!("delivery timed out after {}ms", self.limit.as_millis()),
        )
    }
}

/// Commands processed by the worker, in order
enum Command {
    Deliver {
        change: Arc<ChangeRecord>,
        table: Arc<str>,
        cancel: Option<CancellationToken>,
        deadline: Option<Deadline>,
        reply: oneshot::Sender<DeliveryOutcome>,
    },
    SetEnabled(bool),
    Shutdown,
}

/// Handle to a running destination worker
pub struct DestinationHandle {
    name: String,
    destination_type: DestinationType,
    /// Mirror of the destination's gate, updated ahead of the worker
    enabled: Arc<AtomicBool>,
    tx: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DestinationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationHandle")
            .field("name", &self.name)
            .field("destination_type", &self.destination_type)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl DestinationHandle {
    /// Create a new handle and spawn the worker task
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<D: Destination + 'static>(destination: D, queue_capacity: usize) -> Self {
        let name = destination.name().to_string();
        let destination_type = destination.destination_type();
        let enabled = Arc::new(AtomicBool::new(destination.is_enabled()));
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        let worker_name = name.clone();
        let worker = tokio::spawn(async move {
            destination_worker(destination, rx, worker_name).await;
        });

        Self {
            name,
            destination_type,
            enabled,
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destination_type(&self) -> DestinationType {
        self.destination_type
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Whether the worker is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Deliver a change and wait for the destination's answer
    ///
    /// Waits for queue space when the worker is busy.
    ///
    /// # Errors
    /// `DestinationDisposed` once the worker has stopped, `Destination` when
    /// the destination panicked or the worker was aborted, or whatever the
    /// destination itself returned.
    pub async fn deliver(
        &self,
        change: Arc<ChangeRecord>,
        table: Arc<str>,
    ) -> Result<DeliveryResult, ContractError> {
        match self
            .deliver_with(change, table, DeliveryOptions::default())
            .await
        {
            DeliveryOutcome::Completed(outcome) => outcome,
            DeliveryOutcome::Skipped => Err(ContractError::destination(
                &self.name,
                "delivery cancelled",
            )),
        }
    }

    /// Deliver a change under a cancellation token and a deadline
    ///
    /// Returns [`DeliveryOutcome::Skipped`] only when the destination was
    /// never invoked. Once the worker has started the delivery the call waits
    /// for its answer, bounded by `options.timeout` when one is set.
    pub async fn deliver_with(
        &self,
        change: Arc<ChangeRecord>,
        table: Arc<str>,
        options: DeliveryOptions,
    ) -> DeliveryOutcome {
        let deadline = options.timeout.map(Deadline::after);
        let (reply, response) = oneshot::channel();
        let command = Command::Deliver {
            change,
            table,
            cancel: options.cancel.clone(),
            deadline,
            reply,
        };

        let enqueue = async {
            match deadline {
                Some(deadline) => match timeout_at(deadline.at, self.tx.send(command)).await {
                    Ok(sent) => sent.map_err(|_| self.disposed()),
                    Err(_) => Err(deadline.expired(&self.name)),
                },
                None => self.tx.send(command).await.map_err(|_| self.disposed()),
            }
        };

        let enqueued = tokio::select! {
            biased;
            _ = wait_cancelled(options.cancel.as_ref()) => return DeliveryOutcome::Skipped,
            enqueued = enqueue => enqueued,
        };
        if let Err(e) = enqueued {
            return DeliveryOutcome::Completed(Err(e));
        }

        response.await.unwrap_or_else(|_| {
            DeliveryOutcome::Completed(Err(ContractError::destination(
                &self.name,
                "destination worker terminated",
            )))
        })
    }

    /// Open or close the delivery gate
    ///
    /// The change is ordered after every delivery already queued.
    ///
    /// # Errors
    /// `DestinationDisposed` once the worker has stopped
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), ContractError> {
        self.tx
            .send(Command::SetEnabled(enabled))
            .await
            .map_err(|_| self.disposed())?;
        self.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    /// [`shutdown_within`](Self::shutdown_within) with [`DEFAULT_SHUTDOWN_TIMEOUT`]
    pub async fn shutdown(&self) {
        self.shutdown_within(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Drain queued commands, dispose the destination and stop the worker
    ///
    /// Idempotent; only the first call waits for the worker. A worker still
    /// busy when `timeout` runs out is aborted and its destination is dropped
    /// without `dispose`.
    #[instrument(name = "destination_handle_shutdown", skip(self), fields(destination = %self.name))]
    pub async fn shutdown_within(&self, timeout: Duration) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut worker) = worker else {
            return;
        };
        let deadline = Instant::now() + timeout;

        // A closed channel means the worker already stopped
        let _ = timeout_at(deadline, self.tx.send(Command::Shutdown)).await;

        match timeout_at(deadline, &mut worker).await {
            Ok(Ok(())) => debug!(destination = %self.name, "DestinationHandle shutdown complete"),
            Ok(Err(e)) => error!(destination = %self.name, error = ?e, "Destination worker panicked"),
            Err(_) => {
                error!(
                    destination = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Destination worker did not stop in time, aborting without dispose"
                );
                worker.abort();
            }
        }
    }

    fn disposed(&self) -> ContractError {
        ContractError::DestinationDisposed {
            destination: self.name.clone(),
        }
    }
}

/// Worker task that owns the destination
#[instrument(name = "destination_worker_loop", skip(destination, rx), fields(destination = %name))]
async fn destination_worker<D: Destination>(
    mut destination: D,
    mut rx: mpsc::Receiver<Command>,
    name: String,
) {
    debug!(destination = %name, "Destination worker started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver {
                change,
                table,
                cancel,
                deadline,
                reply,
            } => {
                // Caller gone or cancelled before the destination was reached
                if reply.is_closed() || cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
                {
                    debug!(destination = %name, change_id = %change.id, "Delivery skipped");
                    let _ = reply.send(DeliveryOutcome::Skipped);
                    continue;
                }

                let result = run_delivery(&mut destination, &change, &table, deadline, &name).await;
                if let Err(e) = &result {
                    warn!(destination = %name, change_id = %change.id, error = %e, "Delivery raised an error");
                }
                let _ = reply.send(DeliveryOutcome::Completed(result));
            }
            Command::SetEnabled(enabled) => destination.set_enabled(enabled),
            Command::Shutdown => break,
        }
    }

    if let Err(e) = destination.dispose().await {
        error!(destination = %name, error = %e, "Dispose failed on shutdown");
    }

    debug!(destination = %name, "Destination worker stopped");
}

/// Call the destination once, catching panics and enforcing the deadline
async fn run_delivery<D: Destination>(
    destination: &mut D,
    change: &ChangeRecord,
    table: &str,
    deadline: Option<Deadline>,
    name: &str,
) -> Result<DeliveryResult, ContractError> {
    let started = Instant::now();
    let delivery = AssertUnwindSafe(destination.deliver(change, table)).catch_unwind();

    let caught = match deadline {
        Some(deadline) if deadline.at <= started => return Err(deadline.expired(name)),
        Some(deadline) => match timeout_at(deadline.at, delivery).await {
            Ok(caught) => caught,
            Err(_) => return Err(deadline.expired(name)),
        },
        None => delivery.await,
    };

    match caught {
        Ok(result) => result.map(|delivery| stamp_delivery_time(delivery, started.elapsed())),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(destination = %name, change_id = %change.id, panic = message, "Destination panicked");
            Err(ContractError::destination(
                name,
                format!("destination panicked: {message}"),
            ))
        }
    }
}

fn stamp_delivery_time(delivery: DeliveryResult, elapsed: Duration) -> DeliveryResult {
    if delivery.delivery_time.is_zero() {
        delivery.with_delivery_time(elapsed)
    } else {
        delivery
    }
}

/// Readable text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
