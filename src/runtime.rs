/*!
 * Runtime wiring: one pool, one executor, one health tracker per process
 */

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tether_core_resilience::{
    AccountHealthTracker, AccountStateHook, ConnectionPool, EventSink, ProxyRotationHook,
    ReconnectHook, RecoveryExecutor, RecoveryHooks, ReloginHook, SessionHandle,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::TetherConfig;
use crate::error::Result;
use crate::instrumentation::{RecoveryStats, StatsSnapshot};
use crate::observability::{spawn_event_logger, EventLogger};

/// Collects configuration and hooks for a [`SessionRuntime`]
pub struct SessionRuntimeBuilder<H> {
    config: TetherConfig,
    hooks: RecoveryHooks,
    _handle: PhantomData<fn() -> H>,
}

impl<H: SessionHandle> SessionRuntimeBuilder<H> {
    pub fn with_account_state_hook(mut self, hook: Arc<dyn AccountStateHook>) -> Self {
        self.hooks = self.hooks.with_account_state(hook);
        self
    }

    pub fn with_reconnect_hook(mut self, hook: Arc<dyn ReconnectHook>) -> Self {
        self.hooks = self.hooks.with_reconnect(hook);
        self
    }

    pub fn with_proxy_rotation_hook(mut self, hook: Arc<dyn ProxyRotationHook>) -> Self {
        self.hooks = self.hooks.with_proxy_rotation(hook);
        self
    }

    pub fn with_relogin_hook(mut self, hook: Arc<dyn ReloginHook>) -> Self {
        self.hooks = self.hooks.with_relogin(hook);
        self
    }

    /// Validate the configuration, build every component and start the
    /// background tasks. Must be called inside a tokio runtime.
    pub async fn start(self) -> Result<SessionRuntime<H>> {
        let config = self.config;
        config.validate()?;

        let stats = RecoveryStats::new();
        let (events, logger) = if config.events.enabled {
            let (sink, receiver) = EventSink::channel(config.events.channel_capacity);
            (sink, Some(spawn_event_logger(receiver, stats.clone())))
        } else {
            (EventSink::disabled(), None)
        };

        let pool = Arc::new(ConnectionPool::with_events(
            config.pool_config(),
            events.clone(),
        ));
        pool.start_eviction_task().await;

        let health = Arc::new(AccountHealthTracker::new(config.recovery.history_capacity));
        let executor = Arc::new(
            RecoveryExecutor::new(config.recovery_config())
                .with_table(config.strategy_table()?)
                .with_health(health.clone())
                .with_hooks(self.hooks)
                .with_connections(pool.clone())
                .with_events(events.clone()),
        );

        info!(
            max_per_account = config.pool.max_connections_per_account,
            cleanup_interval_secs = config.pool.cleanup_interval_secs,
            events = config.events.enabled,
            "Session runtime started"
        );

        Ok(SessionRuntime {
            config,
            pool,
            executor,
            health,
            stats,
            events,
            logger: Mutex::new(logger),
            stopped: AtomicBool::new(false),
        })
    }
}

/// The pool, executor and health tracker of one process, wired together
///
/// # Example
/// ```no_run
/// use tether::config::TetherConfig;
/// use tether::runtime::SessionRuntime;
/// use tether_core_resilience::SessionHandle;
///
/// struct Session;
///
/// #[async_trait::async_trait]
/// impl SessionHandle for Session {
///     fn is_connected(&self) -> bool { true }
///     async fn disconnect(&self) {}
/// }
///
/// # async fn example() -> tether::Result<()> {
/// let runtime = SessionRuntime::<Session>::builder(TetherConfig::default())
///     .start()
///     .await?;
///
/// if let Some(conn) = runtime.pool().checkout("acct-1", || async { Ok(Session) }).await? {
///     runtime.pool().return_connection("acct-1", conn, true).await;
/// }
///
/// runtime.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct SessionRuntime<H: SessionHandle> {
    config: TetherConfig,
    pool: Arc<ConnectionPool<H>>,
    executor: Arc<RecoveryExecutor>,
    health: Arc<AccountHealthTracker>,
    stats: RecoveryStats,
    events: EventSink,
    logger: Mutex<Option<EventLogger>>,
    stopped: AtomicBool,
}

impl<H: SessionHandle> SessionRuntime<H> {
    pub fn builder(config: TetherConfig) -> SessionRuntimeBuilder<H> {
        SessionRuntimeBuilder {
            config,
            hooks: RecoveryHooks::default(),
            _handle: PhantomData,
        }
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<H>> {
        &self.pool
    }

    pub fn executor(&self) -> &Arc<RecoveryExecutor> {
        &self.executor
    }

    pub fn health(&self) -> &Arc<AccountHealthTracker> {
        &self.health
    }

    /// Counters as seen by the event logger so far
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.events_dropped = self.events.dropped();
        snapshot
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the pool (closing every session), then flush the event logger.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pool.stop().await;
        if let Some(logger) = self.logger.lock().await.take() {
            logger.shutdown().await;
        }

        let snapshot = self.stats();
        info!(
            errors_handled = snapshot.errors_handled,
            connections_created = snapshot.connections_created,
            events_dropped = snapshot.events_dropped,
            "Session runtime stopped"
        );
    }
}
