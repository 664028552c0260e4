/*!
 * Event consumer: turns pool and recovery events into logs and counters
 */

use tether_core_resilience::PoolEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::instrumentation::RecoveryStats;

/// Handle on a running event logger task
#[derive(Debug)]
pub struct EventLogger {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EventLogger {
    /// Stop accepting events, log whatever is still queued, and wait for the task
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Event logger ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Consume `receiver`, logging and counting each event.
///
/// Runs until every sender is dropped or [`EventLogger::shutdown`] is called.
///
/// ```no_run
/// # use tether::instrumentation::RecoveryStats;
/// # use tether::observability::spawn_event_logger;
/// # use tether_core_resilience::EventSink;
/// # async fn example() {
/// let (sink, receiver) = EventSink::channel(1024);
/// let stats = RecoveryStats::new();
/// let logger = spawn_event_logger(receiver, stats.clone());
///
/// // Hand `sink` to the pool and executor...
/// logger.shutdown().await;
/// # }
/// ```
pub fn spawn_event_logger(
    mut receiver: mpsc::Receiver<PoolEvent>,
    stats: RecoveryStats,
) -> EventLogger {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(event) => {
                        stats.record(&event);
                        log_event(&event);
                    }
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    receiver.close();
                    while let Some(event) = receiver.recv().await {
                        stats.record(&event);
                        log_event(&event);
                    }
                    break;
                }
            }
        }
        debug!("Event stream closed");
    });

    EventLogger { shutdown, task }
}

/// Log one event at a level matching its severity
pub fn log_event(event: &PoolEvent) {
    let name = event.name();
    match event {
        PoolEvent::ConnectionCreated {
            account_key,
            connection_id,
        } => {
            debug!(event = name, account = %account_key, id = connection_id);
        }
        PoolEvent::ConnectionReused {
            account_key,
            connection_id,
            use_count,
        } => {
            debug!(event = name, account = %account_key, id = connection_id, use_count);
        }
        PoolEvent::ConnectionReturned {
            account_key,
            connection_id,
            pooled,
        } => {
            debug!(event = name, account = %account_key, id = connection_id, pooled);
        }
        PoolEvent::ConnectionClosed {
            account_key,
            connection_id,
            reason,
        } => {
            debug!(event = name, account = %account_key, id = connection_id, ?reason);
        }
        PoolEvent::ErrorHandled {
            context,
            action,
            should_retry,
        } => {
            info!(
                event = name,
                account = %context.account_key,
                operation = %context.operation,
                category = %context.category,
                retry_count = context.retry_count,
                %action,
                should_retry
            );
        }
        PoolEvent::ProxyRotated { account_key, proxy } => {
            info!(event = name, account = %account_key, proxy = ?proxy);
        }
        PoolEvent::AccountCooldown {
            account_key,
            seconds,
        } => {
            warn!(event = name, account = %account_key, seconds);
        }
        PoolEvent::AccountDisabled {
            account_key,
            connections_closed,
        } => {
            warn!(event = name, account = %account_key, connections_closed);
        }
        PoolEvent::OperatorNotice { context } => {
            error!(
                event = name,
                account = %context.account_key,
                category = %context.category,
                error = %context.raw_error,
                "Operator attention required"
            );
        }
    }
}
