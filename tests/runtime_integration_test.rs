//! End-to-end tests for the session runtime
//!
//! A runtime is started from configuration, sessions are checked out through
//! its pool, failures go through its executor, and the event logger's
//! counters are read back after shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tether::config::TetherConfig;
use tether::runtime::SessionRuntime;
use tether::TetherError;
use tether_core_resilience::{
    AccountState, AccountStateHook, ProxyDescriptor, ProxyRotationHook, RawFailure,
    RecoveryAction, ResilienceError, SessionHandle,
};

#[derive(Debug)]
struct FakeSession {
    connected: AtomicBool,
}

impl FakeSession {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait::async_trait]
impl SessionHandle for FakeSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct AccountStore {
    states: Mutex<Vec<(String, AccountState)>>,
}

#[async_trait::async_trait]
impl AccountStateHook for AccountStore {
    async fn set_state(&self, account_key: &str, state: AccountState) -> Result<(), ResilienceError> {
        self.states
            .lock()
            .unwrap()
            .push((account_key.to_string(), state));
        Ok(())
    }
}

#[derive(Default)]
struct ProxyInventory {
    rotations: AtomicUsize,
}

#[async_trait::async_trait]
impl ProxyRotationHook for ProxyInventory {
    async fn rotate_proxy(&self, _account_key: &str) -> Result<Option<ProxyDescriptor>, ResilienceError> {
        let n = self.rotations.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("socks5://10.0.0.{}:1080", n + 1)))
    }
}

async fn create_session() -> Result<FakeSession, ResilienceError> {
    Ok(FakeSession::new())
}

#[tokio::test]
async fn test_runtime_handles_ban_end_to_end() {
    let store = Arc::new(AccountStore::default());
    let runtime = SessionRuntime::<FakeSession>::builder(TetherConfig::default())
        .with_account_state_hook(store.clone())
        .start()
        .await
        .unwrap();

    let pool = runtime.pool();
    let held = pool.checkout("A", create_session).await.unwrap().unwrap();
    let idle = pool.checkout("A", create_session).await.unwrap().unwrap();
    pool.return_connection("A", idle, true).await;

    let failure = RawFailure::new("UserDeactivated", "user is deactivated");
    let result = runtime
        .executor()
        .handle_error("A", "send_message", 0, &failure)
        .await;

    assert_eq!(result.action_taken, RecoveryAction::Disable);
    assert!(!result.should_retry);
    assert!(!held.is_connected());
    assert_eq!(pool.account_stats("A").await.total(), 0);
    assert_eq!(runtime.health().health_score("A"), 75);
    assert_eq!(
        store.states.lock().unwrap().as_slice(),
        &[("A".to_string(), AccountState::Disabled)]
    );

    runtime.shutdown().await;
    let stats = runtime.stats();
    assert_eq!(stats.connections_created, 2);
    assert_eq!(stats.accounts_disabled, 1);
    assert_eq!(stats.errors_by_category.get("banned"), Some(&1));
    assert_eq!(stats.actions_taken.get("disable"), Some(&1));
}

#[tokio::test]
async fn test_runtime_rotates_proxy() {
    let proxies = Arc::new(ProxyInventory::default());
    let runtime = SessionRuntime::<FakeSession>::builder(TetherConfig::default())
        .with_proxy_rotation_hook(proxies.clone())
        .start()
        .await
        .unwrap();

    let failure = RawFailure::new("ProxyConnectionError", "socks5 proxy refused connection");
    let result = runtime
        .executor()
        .handle_error("A", "connect", 0, &failure)
        .await;

    assert_eq!(result.action_taken, RecoveryAction::SwitchProxy);
    assert!(result.success);
    assert!(result.should_retry);
    assert!(result.message.contains("socks5://10.0.0.1:1080"));
    assert_eq!(proxies.rotations.load(Ordering::SeqCst), 1);

    runtime.shutdown().await;
    assert_eq!(runtime.stats().proxy_rotations, 1);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let runtime = SessionRuntime::<FakeSession>::builder(TetherConfig::aggressive_preset())
        .start()
        .await
        .unwrap();
    assert!(runtime.is_running());

    let held = runtime
        .pool()
        .checkout("A", create_session)
        .await
        .unwrap()
        .unwrap();

    runtime.shutdown().await;
    runtime.shutdown().await;

    assert!(!runtime.is_running());
    assert!(!held.is_connected());
    assert_eq!(runtime.pool().stats().await.total(), 0);
    assert!(matches!(
        runtime.pool().checkout("A", create_session).await,
        Err(ResilienceError::PoolStopped)
    ));
}

#[tokio::test]
async fn test_runtime_without_events() {
    let mut config = TetherConfig::default();
    config.events.enabled = false;

    let runtime = SessionRuntime::<FakeSession>::builder(config)
        .start()
        .await
        .unwrap();
    let conn = runtime
        .pool()
        .checkout("A", create_session)
        .await
        .unwrap()
        .unwrap();
    runtime.pool().return_connection("A", conn, true).await;
    runtime.shutdown().await;

    let stats = runtime.stats();
    assert_eq!(stats.connections_created, 0);
    assert_eq!(stats.events_dropped, 0);
}

#[tokio::test]
async fn test_invalid_config_refuses_to_start() {
    let mut config = TetherConfig::default();
    config.pool.max_connections_per_account = 0;

    let result = SessionRuntime::<FakeSession>::builder(config).start().await;
    assert!(matches!(result, Err(TetherError::Config(_))));
}

#[tokio::test]
async fn test_runtime_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tether.toml");
    std::fs::write(
        &path,
        r#"
[pool]
max_connections_per_account = 1

[recovery]
default_cooldown_secs = 90

[recovery.strategies.network]
max_retries = 0
"#,
    )
    .unwrap();

    let config = TetherConfig::from_file(&path).unwrap();
    let runtime = SessionRuntime::<FakeSession>::builder(config)
        .start()
        .await
        .unwrap();

    let first = runtime
        .pool()
        .checkout("A", create_session)
        .await
        .unwrap();
    assert!(first.is_some());
    assert!(runtime
        .pool()
        .checkout("A", create_session)
        .await
        .unwrap()
        .is_none());

    let executor = runtime.executor();
    let flood = RawFailure::new("RpcError", "too many requests");
    assert_eq!(
        executor.handle_error("A", "send", 0, &flood).await.retry_delay_seconds,
        90.0
    );

    let timeout = RawFailure::new("TimeoutError", "connection timed out");
    let result = executor.handle_error("A", "send", 0, &timeout).await;
    assert_eq!(result.action_taken, RecoveryAction::Skip);

    runtime.shutdown().await;
}
