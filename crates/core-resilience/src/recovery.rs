//! Recovery executor: classified failure to one recovery side effect
//!
//! [`RecoveryExecutor::execute_recovery`] records the failure in the account's
//! health history, asks the [`RecoveryStrategyTable`] what to do, performs at
//! most one side effect through the configured hooks, and reports the outcome
//! as a [`RecoveryResult`]. The caller decides what to do with
//! `should_retry`; [`RecoveryExecutor::run`] is the standard retry loop.
//!
//! External collaborators (account store, session client, proxy inventory)
//! are reached only through the optional hook traits below. Every hook call
//! is bounded by `hook_timeout`; a timeout counts as a hook failure.

use crate::account_health::{AccountHealthTracker, DEFAULT_HISTORY_CAPACITY};
use crate::classifier::{ErrorCategory, ProviderError};
use crate::connection_pool::AccountConnections;
use crate::context::ErrorContext;
use crate::error::ResilienceError;
use crate::events::{EventSink, PoolEvent};
use crate::strategy::{RecoveryAction, RecoveryStrategyTable, StrategyDecision};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Opaque proxy identifier handed back by the proxy inventory
pub type ProxyDescriptor = String;

/// Availability of an account, as pushed to the account store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccountState {
    Available,
    /// Unavailable for the given number of seconds
    Cooldown { seconds: u64 },
    NeedsReauth,
    Disabled,
}

/// Persists account availability. Must be idempotent.
#[async_trait::async_trait]
pub trait AccountStateHook: Send + Sync {
    async fn set_state(&self, account_key: &str, state: AccountState)
        -> Result<(), ResilienceError>;
}

/// Re-establishes the remote session of an account
#[async_trait::async_trait]
pub trait ReconnectHook: Send + Sync {
    async fn reconnect(&self, account_key: &str) -> Result<(), ResilienceError>;
}

/// Assigns a different proxy to an account. `None` means none is available.
#[async_trait::async_trait]
pub trait ProxyRotationHook: Send + Sync {
    async fn rotate_proxy(&self, account_key: &str)
        -> Result<Option<ProxyDescriptor>, ResilienceError>;
}

/// Logs an account in again
#[async_trait::async_trait]
pub trait ReloginHook: Send + Sync {
    async fn relogin(&self, account_key: &str) -> Result<(), ResilienceError>;
}

/// The set of optional side-effect hooks
#[derive(Clone, Default)]
pub struct RecoveryHooks {
    pub account_state: Option<Arc<dyn AccountStateHook>>,
    pub reconnect: Option<Arc<dyn ReconnectHook>>,
    pub proxy_rotation: Option<Arc<dyn ProxyRotationHook>>,
    pub relogin: Option<Arc<dyn ReloginHook>>,
}

impl RecoveryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account_state(mut self, hook: Arc<dyn AccountStateHook>) -> Self {
        self.account_state = Some(hook);
        self
    }

    pub fn with_reconnect(mut self, hook: Arc<dyn ReconnectHook>) -> Self {
        self.reconnect = Some(hook);
        self
    }

    pub fn with_proxy_rotation(mut self, hook: Arc<dyn ProxyRotationHook>) -> Self {
        self.proxy_rotation = Some(hook);
        self
    }

    pub fn with_relogin(mut self, hook: Arc<dyn ReloginHook>) -> Self {
        self.relogin = Some(hook);
        self
    }
}

impl std::fmt::Debug for RecoveryHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryHooks")
            .field("account_state", &self.account_state.is_some())
            .field("reconnect", &self.reconnect.is_some())
            .field("proxy_rotation", &self.proxy_rotation.is_some())
            .field("relogin", &self.relogin.is_some())
            .finish()
    }
}

/// Configuration for the recovery executor
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Upper bound on a single hook call
    pub hook_timeout: Duration,
    /// Cooldown applied when a rate limit carries no wait
    pub default_cooldown: Duration,
    /// Backoff base for categories that declare none
    pub base_retry_delay: Duration,
    /// Backoff ceiling
    pub max_retry_delay: Duration,
    /// Failures kept per account
    pub history_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(30),
            default_cooldown: Duration::from_secs(300),
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(300),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Outcome of one recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// Whether the recovery side effect itself succeeded
    pub success: bool,
    pub action_taken: RecoveryAction,
    pub message: String,
    /// Whether the caller should attempt the operation again
    pub should_retry: bool,
    /// Wait before the next attempt (or the cooldown length)
    pub retry_delay_seconds: f64,
}

impl RecoveryResult {
    fn new(
        success: bool,
        action_taken: RecoveryAction,
        should_retry: bool,
        delay: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success,
            action_taken,
            message: message.into(),
            should_retry,
            retry_delay_seconds: delay.as_secs_f64(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay_seconds).unwrap_or(Duration::ZERO)
    }
}

/// An operation that [`RecoveryExecutor::run`] gave up on
#[derive(Debug, thiserror::Error)]
#[error("{}: {error}", .result.message)]
pub struct RecoveryFailure<E> {
    /// The final recovery decision
    pub result: RecoveryResult,
    /// The last error returned by the operation
    pub error: E,
}

/// Turns classified failures into recovery actions
pub struct RecoveryExecutor {
    config: RecoveryConfig,
    table: RecoveryStrategyTable,
    health: Arc<AccountHealthTracker>,
    hooks: RecoveryHooks,
    connections: Option<Arc<dyn AccountConnections>>,
    events: EventSink,
}

impl RecoveryExecutor {
    /// Executor with the standard strategy table and no hooks
    pub fn new(config: RecoveryConfig) -> Self {
        let table = RecoveryStrategyTable::new(config.base_retry_delay, config.max_retry_delay);
        let health = Arc::new(AccountHealthTracker::new(config.history_capacity));
        Self {
            config,
            table,
            health,
            hooks: RecoveryHooks::default(),
            connections: None,
            events: EventSink::disabled(),
        }
    }

    pub fn with_table(mut self, table: RecoveryStrategyTable) -> Self {
        self.table = table;
        self
    }

    /// Share a health tracker with other components
    pub fn with_health(mut self, health: Arc<AccountHealthTracker>) -> Self {
        self.health = health;
        self
    }

    pub fn with_hooks(mut self, hooks: RecoveryHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Pool used by `Disable` and `Reconnect`
    pub fn with_connections(mut self, connections: Arc<dyn AccountConnections>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn table(&self) -> &RecoveryStrategyTable {
        &self.table
    }

    pub fn health(&self) -> &Arc<AccountHealthTracker> {
        &self.health
    }

    /// Classify a provider failure and recover from it
    pub fn handle_error<'a>(
        &'a self,
        account_key: &str,
        operation: &str,
        retry_count: u32,
        error: &dyn ProviderError,
    ) -> impl Future<Output = RecoveryResult> + 'a {
        let context = ErrorContext::capture(account_key, operation, retry_count, error);
        self.execute_recovery(context)
    }

    /// Record the failure, pick an action and perform it
    pub async fn execute_recovery(&self, context: ErrorContext) -> RecoveryResult {
        self.health.record(context.clone());

        let decision = self.table.decide(context.category, context.retry_count);
        debug!(
            account = %context.account_key,
            operation = %context.operation,
            category = %context.category,
            retry_count = context.retry_count,
            action = %decision.action,
            "Recovery action selected"
        );

        let result = match decision.action {
            RecoveryAction::Retry => RecoveryResult::new(
                true,
                RecoveryAction::Retry,
                true,
                Duration::ZERO,
                "retrying immediately",
            ),
            RecoveryAction::RetryWithDelay => RecoveryResult::new(
                true,
                RecoveryAction::RetryWithDelay,
                true,
                decision.delay,
                format!("retrying in {:.1}s", decision.delay.as_secs_f64()),
            ),
            RecoveryAction::SwitchProxy => self.switch_proxy(&context, &decision).await,
            RecoveryAction::Reconnect => self.reconnect(&context, &decision).await,
            RecoveryAction::ReAuth => self.reauth(&context, &decision).await,
            RecoveryAction::Cooldown => self.cooldown(&context).await,
            RecoveryAction::Disable => self.disable(&context).await,
            RecoveryAction::Notify => self.notify(&context),
            RecoveryAction::Skip => RecoveryResult::new(
                false,
                RecoveryAction::Skip,
                false,
                Duration::ZERO,
                if decision.exhausted {
                    format!(
                        "retries exhausted ({}/{})",
                        context.retry_count, decision.max_retries
                    )
                } else {
                    "operation skipped".to_string()
                },
            ),
        };

        if result.should_retry {
            info!(
                account = %context.account_key,
                category = %context.category,
                action = %result.action_taken,
                delay_secs = result.retry_delay_seconds,
                "Recovering from error"
            );
        } else {
            warn!(
                account = %context.account_key,
                category = %context.category,
                action = %result.action_taken,
                message = %result.message,
                "Giving up on operation"
            );
        }

        self.events.emit(PoolEvent::ErrorHandled {
            action: result.action_taken,
            should_retry: result.should_retry,
            context,
        });
        result
    }

    /// Drive one logical operation until it succeeds or recovery gives up.
    ///
    /// `op` receives the current retry count, which increases by one per
    /// attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        account_key: &str,
        operation: &str,
        mut op: F,
    ) -> Result<T, RecoveryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ProviderError,
    {
        let mut retry_count = 0u32;
        loop {
            let error = match op(retry_count).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let result = self
                .handle_error(account_key, operation, retry_count, &error)
                .await;
            if !result.should_retry {
                return Err(RecoveryFailure { result, error });
            }

            let delay = result.retry_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            retry_count = retry_count.saturating_add(1);
        }
    }

    async fn call_hook<T>(
        &self,
        hook: &str,
        fut: impl Future<Output = Result<T, ResilienceError>>,
    ) -> Result<T, ResilienceError> {
        match tokio::time::timeout(self.config.hook_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ResilienceError::HookTimeout {
                hook: hook.to_string(),
                timeout: self.config.hook_timeout,
            }),
        }
    }

    async fn set_state(&self, account_key: &str, state: AccountState) -> Result<(), ResilienceError> {
        let Some(hook) = &self.hooks.account_state else {
            return Ok(());
        };
        let result = self
            .call_hook("account_state", hook.set_state(account_key, state.clone()))
            .await;
        if let Err(e) = &result {
            error!(account = %account_key, ?state, error = %e, "Failed to update account state");
        }
        result
    }

    /// Result of a hook-backed action: success retries at once, failure
    /// retries only while budget remains.
    fn hook_outcome(
        context: &ErrorContext,
        decision: &StrategyDecision,
        action: RecoveryAction,
        outcome: Result<String, ResilienceError>,
    ) -> RecoveryResult {
        match outcome {
            Ok(message) => RecoveryResult::new(true, action, true, Duration::ZERO, message),
            Err(e) => {
                warn!(account = %context.account_key, %action, error = %e, "Recovery hook failed");
                let should_retry = context.retry_count < decision.max_retries;
                let delay = if should_retry {
                    decision.delay
                } else {
                    Duration::ZERO
                };
                RecoveryResult::new(false, action, should_retry, delay, e.to_string())
            }
        }
    }

    fn missing_hook(action: RecoveryAction, hook: &str) -> RecoveryResult {
        debug!(%action, hook, "No hook configured, retrying instead");
        RecoveryResult::new(
            true,
            RecoveryAction::Retry,
            true,
            Duration::ZERO,
            format!("no {} hook configured; retrying", hook),
        )
    }

    async fn switch_proxy(&self, context: &ErrorContext, decision: &StrategyDecision) -> RecoveryResult {
        let Some(hook) = &self.hooks.proxy_rotation else {
            return Self::missing_hook(RecoveryAction::SwitchProxy, "proxy_rotation");
        };

        let account_key = &context.account_key;
        let outcome = match self
            .call_hook("proxy_rotation", hook.rotate_proxy(account_key))
            .await
        {
            Ok(Some(proxy)) => {
                self.events.emit(PoolEvent::ProxyRotated {
                    account_key: account_key.clone(),
                    proxy: Some(proxy.clone()),
                });
                Ok(format!("switched to proxy {}", proxy))
            }
            Ok(None) => Err(ResilienceError::hook_failed(
                "proxy_rotation",
                "no alternative proxy available",
            )),
            Err(e) => Err(e),
        };
        Self::hook_outcome(context, decision, RecoveryAction::SwitchProxy, outcome)
    }

    async fn reconnect(&self, context: &ErrorContext, decision: &StrategyDecision) -> RecoveryResult {
        let account_key = &context.account_key;
        let closed = match &self.connections {
            Some(connections) => connections.close_idle_for_account(account_key).await,
            None => 0,
        };

        let Some(hook) = &self.hooks.reconnect else {
            let mut result = Self::missing_hook(RecoveryAction::Reconnect, "reconnect");
            if closed > 0 {
                result.message = format!("closed {} idle connection(s); {}", closed, result.message);
            }
            return result;
        };

        let outcome = self
            .call_hook("reconnect", hook.reconnect(account_key))
            .await
            .map(|()| "reconnected".to_string());
        Self::hook_outcome(context, decision, RecoveryAction::Reconnect, outcome)
    }

    async fn reauth(&self, context: &ErrorContext, decision: &StrategyDecision) -> RecoveryResult {
        let Some(hook) = &self.hooks.relogin else {
            return Self::missing_hook(RecoveryAction::ReAuth, "relogin");
        };

        let account_key = &context.account_key;
        // State hook failures are logged by set_state and do not block relogin.
        let _ = self.set_state(account_key, AccountState::NeedsReauth).await;

        let outcome = match self.call_hook("relogin", hook.relogin(account_key)).await {
            Ok(()) => {
                let _ = self.set_state(account_key, AccountState::Available).await;
                Ok("re-authenticated".to_string())
            }
            Err(e) => Err(e),
        };
        Self::hook_outcome(context, decision, RecoveryAction::ReAuth, outcome)
    }

    async fn cooldown(&self, context: &ErrorContext) -> RecoveryResult {
        let seconds = context
            .wait_seconds()
            .unwrap_or_else(|| self.config.default_cooldown.as_secs());
        let account_key = &context.account_key;

        let applied = self
            .set_state(account_key, AccountState::Cooldown { seconds })
            .await
            .is_ok();
        self.events.emit(PoolEvent::AccountCooldown {
            account_key: account_key.clone(),
            seconds,
        });
        info!(account = %account_key, seconds, "Account cooling down");

        RecoveryResult::new(
            applied,
            RecoveryAction::Cooldown,
            false,
            Duration::from_secs(seconds),
            format!("account cooling down for {}s", seconds),
        )
    }

    async fn disable(&self, context: &ErrorContext) -> RecoveryResult {
        let account_key = &context.account_key;
        let applied = self
            .set_state(account_key, AccountState::Disabled)
            .await
            .is_ok();

        let closed = match &self.connections {
            Some(connections) => connections.close_all_for_account(account_key).await,
            None => 0,
        };
        self.events.emit(PoolEvent::AccountDisabled {
            account_key: account_key.clone(),
            connections_closed: closed,
        });
        warn!(account = %account_key, category = %context.category, closed, "Account disabled");

        RecoveryResult::new(
            applied,
            RecoveryAction::Disable,
            false,
            Duration::ZERO,
            format!("account disabled, {} connection(s) closed", closed),
        )
    }

    fn notify(&self, context: &ErrorContext) -> RecoveryResult {
        error!(
            account = %context.account_key,
            category = %context.category,
            error = %context.raw_error,
            "Operator attention required"
        );
        self.events.emit(PoolEvent::OperatorNotice {
            context: context.clone(),
        });

        let message = match context.category {
            ErrorCategory::Auth => "re-authentication failed; operator notified",
            ErrorCategory::Banned => "account banned; operator notified",
            _ => "operator notified",
        };
        RecoveryResult::new(true, RecoveryAction::Notify, false, Duration::ZERO, message)
    }
}

impl std::fmt::Debug for RecoveryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryExecutor")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("connections", &self.connections.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RawFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStateHook {
        states: Mutex<Vec<(String, AccountState)>>,
    }

    #[async_trait::async_trait]
    impl AccountStateHook for RecordingStateHook {
        async fn set_state(
            &self,
            account_key: &str,
            state: AccountState,
        ) -> Result<(), ResilienceError> {
            self.states
                .lock()
                .unwrap()
                .push((account_key.to_string(), state));
            Ok(())
        }
    }

    struct FailingRelogin;

    #[async_trait::async_trait]
    impl ReloginHook for FailingRelogin {
        async fn relogin(&self, _account_key: &str) -> Result<(), ResilienceError> {
            Err(ResilienceError::hook_failed("relogin", "code expired"))
        }
    }

    #[derive(Default)]
    struct CountingRelogin {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ReloginHook for CountingRelogin {
        async fn relogin(&self, _account_key: &str) -> Result<(), ResilienceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoSpareProxy;

    #[async_trait::async_trait]
    impl ProxyRotationHook for NoSpareProxy {
        async fn rotate_proxy(&self, _account_key: &str) -> Result<Option<ProxyDescriptor>, ResilienceError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CountingReconnect {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ReconnectHook for CountingReconnect {
        async fn reconnect(&self, _account_key: &str) -> Result<(), ResilienceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowReconnect;

    #[async_trait::async_trait]
    impl ReconnectHook for SlowReconnect {
        async fn reconnect(&self, _account_key: &str) -> Result<(), ResilienceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnections {
        all: AtomicUsize,
        idle: AtomicUsize,
        idle_open: usize,
    }

    #[async_trait::async_trait]
    impl AccountConnections for CountingConnections {
        async fn close_all_for_account(&self, _account_key: &str) -> usize {
            self.all.fetch_add(1, Ordering::SeqCst);
            2
        }

        async fn close_idle_for_account(&self, _account_key: &str) -> usize {
            self.idle.fetch_add(1, Ordering::SeqCst);
            self.idle_open
        }
    }

    fn context(type_name: &str, message: &str, retry_count: u32) -> ErrorContext {
        ErrorContext::capture("acct-1", "send", retry_count, &RawFailure::new(type_name, message))
    }

    #[tokio::test]
    async fn test_network_retry_first() {
        let executor = RecoveryExecutor::new(RecoveryConfig::default());
        let result = executor
            .execute_recovery(context("TimeoutError", "connection timed out", 0))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Retry);
        assert!(result.should_retry);
        assert_eq!(result.retry_delay_seconds, 0.0);
        assert_eq!(executor.health().health_score("acct-1"), 95);
    }

    #[tokio::test]
    async fn test_retry_with_delay_reports_backoff() {
        let executor = RecoveryExecutor::new(RecoveryConfig::default());
        let result = executor
            .execute_recovery(context("TimeoutError", "connection timed out", 1))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::RetryWithDelay);
        assert_eq!(result.retry_delay_seconds, 10.0);
    }

    #[tokio::test]
    async fn test_cooldown_uses_declared_wait() {
        let state = Arc::new(RecordingStateHook::default());
        let executor = RecoveryExecutor::new(RecoveryConfig::default())
            .with_hooks(RecoveryHooks::new().with_account_state(state.clone()));

        let result = executor
            .execute_recovery(context("FloodWaitError", "flood wait of 45 seconds", 0))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Cooldown);
        assert!(!result.should_retry);
        assert_eq!(result.retry_delay_seconds, 45.0);
        assert_eq!(
            state.states.lock().unwrap().as_slice(),
            &[("acct-1".to_string(), AccountState::Cooldown { seconds: 45 })]
        );
    }

    #[tokio::test]
    async fn test_cooldown_without_wait_uses_default() {
        let executor = RecoveryExecutor::new(RecoveryConfig {
            default_cooldown: Duration::from_secs(120),
            ..Default::default()
        });
        let result = executor
            .execute_recovery(context("RpcError", "too many requests", 0))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Cooldown);
        assert_eq!(result.retry_delay_seconds, 120.0);
    }

    #[tokio::test]
    async fn test_banned_disables_and_closes() {
        let state = Arc::new(RecordingStateHook::default());
        let connections = Arc::new(CountingConnections::default());
        let executor = RecoveryExecutor::new(RecoveryConfig::default())
            .with_hooks(RecoveryHooks::new().with_account_state(state.clone()))
            .with_connections(connections.clone());

        let result = executor
            .execute_recovery(context("UserDeactivated", "user is deactivated", 0))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Disable);
        assert!(!result.should_retry);
        assert_eq!(connections.all.load(Ordering::SeqCst), 1);
        assert_eq!(state.states.lock().unwrap()[0].1, AccountState::Disabled);
    }

    #[tokio::test]
    async fn test_relogin_failure_respects_budget() {
        let state = Arc::new(RecordingStateHook::default());
        let executor = RecoveryExecutor::new(RecoveryConfig::default()).with_hooks(
            RecoveryHooks::new()
                .with_account_state(state.clone())
                .with_relogin(Arc::new(FailingRelogin)),
        );

        let result = executor
            .execute_recovery(context("AuthKeyUnregisteredError", "auth key unregistered", 0))
            .await;
        assert_eq!(result.action_taken, RecoveryAction::ReAuth);
        assert!(!result.success);
        // Budget of 1, first attempt: one more try allowed.
        assert!(result.should_retry);
        assert_eq!(
            state.states.lock().unwrap().as_slice(),
            &[("acct-1".to_string(), AccountState::NeedsReauth)]
        );

        let result = executor
            .execute_recovery(context("AuthKeyUnregisteredError", "auth key unregistered", 1))
            .await;
        assert_eq!(result.action_taken, RecoveryAction::Notify);
        assert!(!result.should_retry);
    }

    #[tokio::test]
    async fn test_relogin_success_restores_account() {
        let state = Arc::new(RecordingStateHook::default());
        let relogin = Arc::new(CountingRelogin::default());
        let executor = RecoveryExecutor::new(RecoveryConfig::default()).with_hooks(
            RecoveryHooks::new()
                .with_account_state(state.clone())
                .with_relogin(relogin.clone()),
        );

        let result = executor
            .execute_recovery(context("SessionRevokedError", "session revoked", 0))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::ReAuth);
        assert!(result.success);
        assert!(result.should_retry);
        assert_eq!(result.retry_delay_seconds, 0.0);
        assert_eq!(relogin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            state.states.lock().unwrap().as_slice(),
            &[
                ("acct-1".to_string(), AccountState::NeedsReauth),
                ("acct-1".to_string(), AccountState::Available),
            ]
        );
    }

    #[tokio::test]
    async fn test_proxy_inventory_exhausted_is_failure() {
        let (events, mut rx) = EventSink::channel(8);
        let executor = RecoveryExecutor::new(RecoveryConfig::default())
            .with_hooks(RecoveryHooks::new().with_proxy_rotation(Arc::new(NoSpareProxy)))
            .with_events(events);

        let result = executor
            .execute_recovery(context("ProxyError", "socks5 handshake failed", 0))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::SwitchProxy);
        assert!(!result.success);
        // Budget of 2 remains, so the caller may try again after the backoff.
        assert!(result.should_retry);
        assert_eq!(result.retry_delay_seconds, 10.0);
        assert!(result.message.contains("no alternative proxy"));

        // No rotation happened, only the handled-error event is sent.
        assert!(matches!(
            rx.recv().await.unwrap(),
            PoolEvent::ErrorHandled {
                action: RecoveryAction::SwitchProxy,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_hook_success() {
        let connections = Arc::new(CountingConnections::default());
        let reconnect = Arc::new(CountingReconnect::default());
        let executor = RecoveryExecutor::new(RecoveryConfig::default())
            .with_hooks(RecoveryHooks::new().with_reconnect(reconnect.clone()))
            .with_connections(connections.clone());

        let result = executor
            .execute_recovery(context("TimeoutError", "connection timed out", 2))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Reconnect);
        assert!(result.success);
        assert!(result.should_retry);
        assert_eq!(result.retry_delay_seconds, 0.0);
        assert_eq!(reconnect.calls.load(Ordering::SeqCst), 1);
        assert_eq!(connections.idle.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_without_hook_closes_idle_then_retries() {
        let connections = Arc::new(CountingConnections {
            idle_open: 2,
            ..Default::default()
        });
        let executor =
            RecoveryExecutor::new(RecoveryConfig::default()).with_connections(connections.clone());

        let result = executor
            .execute_recovery(context("TimeoutError", "connection timed out", 2))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Retry);
        assert!(result.should_retry);
        assert_eq!(result.retry_delay_seconds, 0.0);
        assert!(result.message.contains("closed 2 idle connection(s)"));
        assert_eq!(connections.idle.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_timeout_counts_as_failure() {
        let connections = Arc::new(CountingConnections::default());
        let executor = RecoveryExecutor::new(RecoveryConfig {
            hook_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .with_hooks(RecoveryHooks::new().with_reconnect(Arc::new(SlowReconnect)))
        .with_connections(connections.clone());

        let result = executor
            .execute_recovery(context("TimeoutError", "connection timed out", 2))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Reconnect);
        assert!(!result.success);
        assert!(result.should_retry);
        assert!(result.message.contains("timed out"));
        assert_eq!(connections.idle.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_hook_degrades_to_retry() {
        let executor = RecoveryExecutor::new(RecoveryConfig::default());
        let result = executor
            .execute_recovery(context("ProxyError", "socks5 handshake failed", 0))
            .await;

        assert_eq!(result.action_taken, RecoveryAction::Retry);
        assert!(result.should_retry);
    }

    #[tokio::test]
    async fn test_notify_emits_operator_notice() {
        let (events, mut rx) = EventSink::channel(8);
        let executor = RecoveryExecutor::new(RecoveryConfig::default()).with_events(events);

        executor
            .execute_recovery(context("UserDeactivated", "user is deactivated", 1))
            .await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PoolEvent::OperatorNotice { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            PoolEvent::ErrorHandled {
                action: RecoveryAction::Notify,
                should_retry: false,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_success() {
        let executor = RecoveryExecutor::new(RecoveryConfig::default());
        let seen = Mutex::new(Vec::new());

        let value = executor
            .run("acct-1", "send", |retry_count| {
                seen.lock().unwrap().push(retry_count);
                async move {
                    if retry_count < 2 {
                        Err(RawFailure::new("TimeoutError", "connection timed out"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_when_exhausted() {
        let executor = RecoveryExecutor::new(RecoveryConfig::default());

        let failure = executor
            .run("acct-1", "send", |_| async {
                Err::<(), _>(RawFailure::new("InternalServerError", "500 internal error"))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.result.action_taken, RecoveryAction::Skip);
        assert!(!failure.result.should_retry);
        assert_eq!(executor.health().error_history("acct-1", 10).len(), 2);
    }
}
