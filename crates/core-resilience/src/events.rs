//! Typed observability events
//!
//! The pool and the recovery executor report what they do as [`PoolEvent`]
//! values on a bounded channel. Emitting never blocks and never fails from
//! the caller's point of view: when the consumer falls behind, events are
//! dropped and counted instead of stalling a checkout or a recovery.

use crate::context::ErrorContext;
use crate::strategy::RecoveryAction;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Why a pooled connection was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Liveness check failed at checkout or return
    LivenessFailed,
    /// Returned with `keep_alive = false`
    Released,
    /// Idle longer than the idle timeout
    IdleTimeout,
    /// Older than the maximum connection age
    MaxAge,
    /// Oldest idle connection evicted to make room
    Evicted,
    /// Account closed (disable, ban, reconnect)
    AccountClosed,
    /// Pool shutdown
    PoolStopped,
}

/// Something the pool or the executor did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    ConnectionCreated {
        account_key: String,
        connection_id: u64,
    },
    ConnectionReused {
        account_key: String,
        connection_id: u64,
        use_count: u64,
    },
    ConnectionReturned {
        account_key: String,
        connection_id: u64,
        pooled: bool,
    },
    ConnectionClosed {
        account_key: String,
        connection_id: u64,
        reason: CloseReason,
    },
    ErrorHandled {
        context: ErrorContext,
        action: RecoveryAction,
        should_retry: bool,
    },
    ProxyRotated {
        account_key: String,
        proxy: Option<String>,
    },
    AccountCooldown {
        account_key: String,
        seconds: u64,
    },
    AccountDisabled {
        account_key: String,
        connections_closed: usize,
    },
    /// The only event meant for a human operator
    OperatorNotice {
        context: ErrorContext,
    },
}

impl PoolEvent {
    /// Dotted/dashed event name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::ConnectionCreated { .. } => "connection-created",
            PoolEvent::ConnectionReused { .. } => "connection-reused",
            PoolEvent::ConnectionReturned { .. } => "connection-returned",
            PoolEvent::ConnectionClosed { .. } => "connection-closed",
            PoolEvent::ErrorHandled { .. } => "error.handled",
            PoolEvent::ProxyRotated { .. } => "proxy.rotated",
            PoolEvent::AccountCooldown { .. } => "account.cooldown",
            PoolEvent::AccountDisabled { .. } => "account.disabled",
            PoolEvent::OperatorNotice { .. } => "operator.notice",
        }
    }

    pub fn account_key(&self) -> &str {
        match self {
            PoolEvent::ConnectionCreated { account_key, .. }
            | PoolEvent::ConnectionReused { account_key, .. }
            | PoolEvent::ConnectionReturned { account_key, .. }
            | PoolEvent::ConnectionClosed { account_key, .. }
            | PoolEvent::ProxyRotated { account_key, .. }
            | PoolEvent::AccountCooldown { account_key, .. }
            | PoolEvent::AccountDisabled { account_key, .. } => account_key,
            PoolEvent::ErrorHandled { context, .. } | PoolEvent::OperatorNotice { context } => {
                &context.account_key
            }
        }
    }
}

/// Non-blocking sender side of the event stream
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::Sender<PoolEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Create a sink and the receiver a consumer task should drain
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PoolEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Send an event without waiting; failures are counted, never returned
    pub fn emit(&self, event: PoolEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match &e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            debug!(event = e.into_inner().name(), reason, "event dropped");
        }
    }

    /// Events that could not be delivered
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
