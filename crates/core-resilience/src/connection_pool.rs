//! Per-account connection pool for long-lived session handles
//!
//! Each account key owns an idle queue and an active set. A connection is
//! either queued idle or held by exactly one caller; the pool never hands the
//! same connection to two callers at once.
//!
//! - `checkout` reuses the newest live idle connection, or creates one when
//!   the account is under its cap, or returns `None` when it is not. It never
//!   waits for capacity.
//! - `return_connection` re-queues a connection only if it still passes the
//!   liveness check; the idle queue stays below the per-account cap by
//!   evicting its oldest entry.
//! - A background sweep reclaims idle connections past their idle timeout or
//!   maximum age.
//!
//! All bookkeeping happens under one pool-wide lock. Creating and closing
//! handles happens after the lock is released.

use crate::error::ResilienceError;
use crate::events::{CloseReason, EventSink, PoolEvent};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for connection pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle + active + connecting connections per account
    pub max_connections_per_account: usize,
    /// Idle connections unused for longer than this are closed by the sweep
    pub idle_timeout: Duration,
    /// Idle connections older than this are closed by the sweep
    pub max_connection_age: Duration,
    /// How often the eviction sweep runs
    pub cleanup_interval: Duration,
    /// Upper bound on a single handle disconnect
    pub close_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_account: 3,
            idle_timeout: Duration::from_secs(300),      // 5 minutes
            max_connection_age: Duration::from_secs(3600), // 1 hour
            cleanup_interval: Duration::from_secs(60),
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// A remote-session handle the pool can manage
#[async_trait::async_trait]
pub trait SessionHandle: Send + Sync + 'static {
    /// Liveness check. Must be O(1) and side-effect free (no network round trip).
    fn is_connected(&self) -> bool;

    /// Close the underlying session
    async fn disconnect(&self);
}

/// Lifecycle state of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Active,
    Connecting,
    Disconnected,
    Error,
}

/// A session handle plus the metadata the pool tracks for it.
///
/// Handed out by [`ConnectionPool::checkout`] and given back through
/// [`ConnectionPool::return_connection`]. Pool-owned fields are read-only to
/// the caller. Derefs to the handle.
#[derive(Debug)]
pub struct PooledConnection<H> {
    id: u64,
    account_key: String,
    handle: Arc<H>,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    error_count: u32,
    last_error: Option<String>,
    idle_timeout: Duration,
}

impl<H> PooledConnection<H> {
    fn new(id: u64, account_key: &str, handle: Arc<H>, idle_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            id,
            account_key: account_key.to_string(),
            handle,
            state: ConnectionState::Connecting,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            error_count: 0,
            last_error: None,
            idle_timeout,
        }
    }

    fn mark_checked_out(&mut self) {
        self.state = ConnectionState::Active;
        self.use_count += 1;
        self.last_used_at = Instant::now();
    }

    fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.last_used_at) > self.idle_timeout
            || now.saturating_duration_since(self.created_at) > max_age
    }

    /// Pool-assigned identifier, unique for the pool's lifetime
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn account_key(&self) -> &str {
        &self.account_key
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Number of times this connection has been checked out
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Note an operation failure on this connection
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }
}

impl<H> Deref for PooledConnection<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

/// A handle on its way out of the pool
struct Doomed<H> {
    account_key: String,
    id: u64,
    handle: Arc<H>,
    reason: CloseReason,
}

impl<H> Doomed<H> {
    fn from_pooled(conn: PooledConnection<H>, reason: CloseReason) -> Self {
        Self {
            account_key: conn.account_key,
            id: conn.id,
            handle: conn.handle,
            reason,
        }
    }
}

/// Connections of one account
struct AccountSlots<H> {
    /// Distinguishes this slot set from one recreated after `close_all_for_account`
    epoch: u64,
    /// Oldest at the front
    idle: VecDeque<PooledConnection<H>>,
    /// Handles currently held by callers, by connection id
    active: HashMap<u64, Arc<H>>,
    /// Slots reserved by in-flight `create_fn` calls
    connecting: usize,
}

impl<H> AccountSlots<H> {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            idle: VecDeque::new(),
            active: HashMap::new(),
            connecting: 0,
        }
    }

    fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.connecting
    }

    fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn drain(&mut self, reason: CloseReason, account_key: &str) -> Vec<Doomed<H>> {
        let mut doomed: Vec<Doomed<H>> = self
            .idle
            .drain(..)
            .map(|conn| Doomed::from_pooled(conn, reason))
            .collect();
        doomed.extend(self.active.drain().map(|(id, handle)| Doomed {
            account_key: account_key.to_string(),
            id,
            handle,
            reason,
        }));
        doomed
    }
}

/// Internal pool state
struct PoolState<H> {
    accounts: HashMap<String, AccountSlots<H>>,
    next_id: u64,
    next_epoch: u64,
    stopped: bool,
}

impl<H> PoolState<H> {
    fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            next_id: 1,
            next_epoch: 1,
            stopped: false,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn slots_mut(&mut self, account_key: &str) -> &mut AccountSlots<H> {
        let epoch = self.next_epoch;
        let slots = self
            .accounts
            .entry(account_key.to_string())
            .or_insert_with(|| AccountSlots::new(epoch));
        if slots.epoch == epoch {
            self.next_epoch += 1;
        }
        slots
    }

    fn prune(&mut self, account_key: &str) {
        if self
            .accounts
            .get(account_key)
            .is_some_and(AccountSlots::is_empty)
        {
            self.accounts.remove(account_key);
        }
    }
}

struct Sweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Accounts with at least one tracked connection
    pub accounts: usize,
    pub idle: usize,
    pub active: usize,
    pub connecting: usize,
    /// Per-account cap
    pub max_per_account: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.idle + self.active + self.connecting
    }
}

/// Connection counts of one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountStats {
    pub idle: usize,
    pub active: usize,
    pub connecting: usize,
}

impl AccountStats {
    pub fn total(&self) -> usize {
        self.idle + self.active + self.connecting
    }
}

/// Account-scoped connection control, used by the recovery executor
#[async_trait::async_trait]
pub trait AccountConnections: Send + Sync {
    /// Close every idle and active connection of the account
    async fn close_all_for_account(&self, account_key: &str) -> usize;

    /// Close only the idle connections of the account
    async fn close_idle_for_account(&self, account_key: &str) -> usize;
}

/// Per-account pool of session handles
///
/// # Example
/// ```no_run
/// use tether_core_resilience::{ConnectionPool, PoolConfig, SessionHandle, ResilienceError};
/// use std::sync::Arc;
///
/// struct Session;
///
/// #[async_trait::async_trait]
/// impl SessionHandle for Session {
///     fn is_connected(&self) -> bool { true }
///     async fn disconnect(&self) {}
/// }
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let pool = Arc::new(ConnectionPool::<Session>::new(PoolConfig::default()));
/// pool.start_eviction_task().await;
///
/// if let Some(conn) = pool.checkout("acct-1", || async { Ok(Session) }).await? {
///     // Use connection...
///     pool.return_connection("acct-1", conn, true).await;
/// }
///
/// pool.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<H: SessionHandle> {
    config: Arc<PoolConfig>,
    state: Mutex<PoolState<H>>,
    events: EventSink,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<H: SessionHandle> ConnectionPool<H> {
    /// Create a pool that does not emit events
    pub fn new(config: PoolConfig) -> Self {
        Self::with_events(config, EventSink::disabled())
    }

    /// Create a pool reporting to the given event sink
    pub fn with_events(config: PoolConfig, events: EventSink) -> Self {
        Self {
            config: Arc::new(config),
            state: Mutex::new(PoolState::new()),
            events,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a connection for `account_key`.
    ///
    /// Returns `Ok(None)` when the account is at capacity. `create_fn` is only
    /// called on a miss and runs without the pool lock held; it should fail
    /// fast rather than retry internally.
    pub async fn checkout<F, Fut>(
        &self,
        account_key: &str,
        create_fn: F,
    ) -> Result<Option<PooledConnection<H>>, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, ResilienceError>>,
    {
        let mut dead = Vec::new();
        let (id, epoch) = {
            let mut state = self.state.lock().await;
            if state.stopped {
                return Err(ResilienceError::PoolStopped);
            }

            let max = self.config.max_connections_per_account;
            let slots = state.slots_mut(account_key);

            while let Some(mut conn) = slots.idle.pop_back() {
                if conn.handle.is_connected() {
                    conn.mark_checked_out();
                    slots.active.insert(conn.id, conn.handle.clone());
                    drop(state);

                    self.close_doomed(dead).await;
                    debug!(account = %account_key, id = conn.id, uses = conn.use_count, "Reusing pooled connection");
                    self.events.emit(PoolEvent::ConnectionReused {
                        account_key: account_key.to_string(),
                        connection_id: conn.id,
                        use_count: conn.use_count,
                    });
                    return Ok(Some(conn));
                }
                conn.state = ConnectionState::Error;
                dead.push(Doomed::from_pooled(conn, CloseReason::LivenessFailed));
            }

            if slots.total() >= max {
                state.prune(account_key);
                drop(state);
                self.close_doomed(dead).await;
                debug!(account = %account_key, max, "Account at connection capacity");
                return Ok(None);
            }

            slots.connecting += 1;
            let epoch = slots.epoch;
            (state.allocate_id(), epoch)
        };

        self.close_doomed(dead).await;

        let created = create_fn().await;

        let mut state = self.state.lock().await;
        let stopped = state.stopped;
        let slots = state
            .accounts
            .get_mut(account_key)
            .filter(|slots| slots.epoch == epoch);

        let Some(slots) = slots else {
            // The account was closed (or the pool stopped) while connecting.
            drop(state);
            if let Ok(handle) = created {
                self.close_doomed(vec![Doomed {
                    account_key: account_key.to_string(),
                    id,
                    handle: Arc::new(handle),
                    reason: if stopped {
                        CloseReason::PoolStopped
                    } else {
                        CloseReason::AccountClosed
                    },
                }])
                .await;
            }
            return Err(if stopped {
                ResilienceError::PoolStopped
            } else {
                ResilienceError::Transient(format!(
                    "account {} was closed while connecting",
                    account_key
                ))
            });
        };

        slots.connecting = slots.connecting.saturating_sub(1);
        match created {
            Ok(handle) => {
                let mut conn = PooledConnection::new(
                    id,
                    account_key,
                    Arc::new(handle),
                    self.config.idle_timeout,
                );
                conn.mark_checked_out();
                slots.active.insert(id, conn.handle.clone());
                drop(state);

                info!(account = %account_key, id, "Created new connection");
                self.events.emit(PoolEvent::ConnectionCreated {
                    account_key: account_key.to_string(),
                    connection_id: id,
                });
                Ok(Some(conn))
            }
            Err(e) => {
                state.prune(account_key);
                drop(state);
                warn!(account = %account_key, error = %e, "Connection creation failed");
                Err(e)
            }
        }
    }

    /// Give a checked-out connection back.
    ///
    /// With `keep_alive = false`, or when the liveness check fails, the
    /// handle is closed instead of queued. A connection the pool already
    /// closed (account closed or pool stopped) is dropped without a second
    /// disconnect. Returns whether it was queued.
    pub async fn return_connection(
        &self,
        account_key: &str,
        mut conn: PooledConnection<H>,
        keep_alive: bool,
    ) -> bool {
        let mut doomed = Vec::new();
        let conn_id = conn.id;
        let owner = conn.account_key.clone();
        if owner != account_key {
            warn!(account = %account_key, owner = %owner, "Connection returned under the wrong account");
        }

        let pooled = {
            let mut state = self.state.lock().await;
            let tracked = !state.stopped
                && state
                    .accounts
                    .get_mut(&owner)
                    .is_some_and(|slots| slots.active.remove(&conn.id).is_some());

            // Untracked handles were already closed by close_all_for_account or stop.
            if !tracked {
                drop(state);
                debug!(account = %owner, id = conn_id, "Returned connection was already closed");
                self.events.emit(PoolEvent::ConnectionReturned {
                    account_key: owner,
                    connection_id: conn_id,
                    pooled: false,
                });
                return false;
            }

            let rejection = if !keep_alive {
                Some(CloseReason::Released)
            } else if !conn.handle.is_connected() {
                Some(CloseReason::LivenessFailed)
            } else {
                None
            };

            match rejection {
                Some(reason) => {
                    conn.state = ConnectionState::Disconnected;
                    doomed.push(Doomed::from_pooled(conn, reason));
                    state.prune(&owner);
                    false
                }
                None => {
                    let room = self.config.max_connections_per_account.saturating_sub(1);
                    let slots = state.slots_mut(&owner);
                    while !slots.idle.is_empty() && slots.idle.len() >= room {
                        if let Some(oldest) = slots.idle.pop_front() {
                            doomed.push(Doomed::from_pooled(oldest, CloseReason::Evicted));
                        }
                    }
                    conn.state = ConnectionState::Idle;
                    conn.last_used_at = Instant::now();
                    slots.idle.push_back(conn);
                    true
                }
            }
        };

        self.close_doomed(doomed).await;
        self.events.emit(PoolEvent::ConnectionReturned {
            account_key: owner,
            connection_id: conn_id,
            pooled,
        });
        pooled
    }

    /// Close every idle and active connection of an account
    pub async fn close_all_for_account(&self, account_key: &str) -> usize {
        let doomed = {
            let mut state = self.state.lock().await;
            match state.accounts.remove(account_key) {
                Some(mut slots) => slots.drain(CloseReason::AccountClosed, account_key),
                None => Vec::new(),
            }
        };
        let closed = self.close_doomed(doomed).await;
        if closed > 0 {
            info!(account = %account_key, closed, "Closed all connections for account");
        }
        closed
    }

    /// Close the idle connections of an account, leaving active ones alone
    pub async fn close_idle_for_account(&self, account_key: &str) -> usize {
        let doomed: Vec<Doomed<H>> = {
            let mut state = self.state.lock().await;
            let doomed = match state.accounts.get_mut(account_key) {
                Some(slots) => slots
                    .idle
                    .drain(..)
                    .map(|conn| Doomed::from_pooled(conn, CloseReason::AccountClosed))
                    .collect(),
                None => Vec::new(),
            };
            state.prune(account_key);
            doomed
        };
        self.close_doomed(doomed).await
    }

    /// Run one eviction sweep over idle connections. Returns how many were closed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let max_age = self.config.max_connection_age;

        let doomed = {
            let mut state = self.state.lock().await;
            let mut doomed = Vec::new();
            for slots in state.accounts.values_mut() {
                let mut kept = VecDeque::with_capacity(slots.idle.len());
                for conn in slots.idle.drain(..) {
                    if now.saturating_duration_since(conn.created_at) > max_age {
                        doomed.push(Doomed::from_pooled(conn, CloseReason::MaxAge));
                    } else if conn.is_expired(now, max_age) {
                        doomed.push(Doomed::from_pooled(conn, CloseReason::IdleTimeout));
                    } else if !conn.handle.is_connected() {
                        doomed.push(Doomed::from_pooled(conn, CloseReason::LivenessFailed));
                    } else {
                        kept.push_back(conn);
                    }
                }
                slots.idle = kept;
            }
            state.accounts.retain(|_, slots| !slots.is_empty());
            doomed
        };

        let evicted = self.close_doomed(doomed).await;
        if evicted > 0 {
            debug!(evicted, "Eviction sweep closed idle connections");
        }
        evicted
    }

    /// Start the periodic eviction sweep. Calling it again is a no-op.
    pub async fn start_eviction_task(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() || self.state.lock().await.stopped {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let pool: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.evict_expired().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Eviction task finished");
        });

        *sweeper = Some(Sweeper { shutdown, task });
    }

    /// Stop the sweep and close every connection. Safe to call repeatedly;
    /// the pool stays queryable afterwards.
    pub async fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            let _ = sweeper.shutdown.send(true);
            if let Err(e) = sweeper.task.await {
                warn!(error = %e, "Eviction task ended abnormally");
            }
        }

        let doomed = {
            let mut state = self.state.lock().await;
            state.stopped = true;
            let mut doomed = Vec::new();
            for (account_key, mut slots) in state.accounts.drain() {
                doomed.extend(slots.drain(CloseReason::PoolStopped, &account_key));
            }
            doomed
        };

        let closed = self.close_doomed(doomed).await;
        if closed > 0 {
            info!(closed, "Connection pool stopped");
        }
    }

    pub async fn is_stopped(&self) -> bool {
        self.state.lock().await.stopped
    }

    /// Get current pool statistics
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let mut stats = PoolStats {
            accounts: state.accounts.len(),
            max_per_account: self.config.max_connections_per_account,
            ..Default::default()
        };
        for slots in state.accounts.values() {
            stats.idle += slots.idle.len();
            stats.active += slots.active.len();
            stats.connecting += slots.connecting;
        }
        stats
    }

    pub async fn account_stats(&self, account_key: &str) -> AccountStats {
        let state = self.state.lock().await;
        state
            .accounts
            .get(account_key)
            .map(|slots| AccountStats {
                idle: slots.idle.len(),
                active: slots.active.len(),
                connecting: slots.connecting,
            })
            .unwrap_or_default()
    }

    pub async fn idle_count(&self, account_key: &str) -> usize {
        self.account_stats(account_key).await.idle
    }

    pub async fn active_count(&self, account_key: &str) -> usize {
        self.account_stats(account_key).await.active
    }

    /// Disconnect handles concurrently, outside the pool lock
    async fn close_doomed(&self, doomed: Vec<Doomed<H>>) -> usize {
        let count = doomed.len();
        if count == 0 {
            return 0;
        }

        let timeout = self.config.close_timeout;
        join_all(doomed.into_iter().map(|d| async move {
            if tokio::time::timeout(timeout, d.handle.disconnect())
                .await
                .is_err()
            {
                warn!(account = %d.account_key, id = d.id, ?timeout, "Disconnect timed out");
            }
            debug!(account = %d.account_key, id = d.id, reason = ?d.reason, "Closed connection");
            self.events.emit(PoolEvent::ConnectionClosed {
                account_key: d.account_key,
                connection_id: d.id,
                reason: d.reason,
            });
        }))
        .await;

        count
    }
}

#[async_trait::async_trait]
impl<H: SessionHandle> AccountConnections for ConnectionPool<H> {
    async fn close_all_for_account(&self, account_key: &str) -> usize {
        ConnectionPool::close_all_for_account(self, account_key).await
    }

    async fn close_idle_for_account(&self, account_key: &str) -> usize {
        ConnectionPool::close_idle_for_account(self, account_key).await
    }
}

impl<H: SessionHandle> Debug for ConnectionPool<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
