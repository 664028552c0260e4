//! Tether Core Resilience: session pooling and error recovery primitives
//!
//! # Overview
//!
//! This crate keeps many long-lived remote sessions (one or more per
//! account) healthy in front of a service that rate-limits, drops
//! connections and bans accounts. It includes:
//!
//! - **Connection Pool**: Per-account reuse of session handles with a hard capacity cap,
//!   liveness checks and a background eviction sweep
//! - **Error Classifier**: Pure mapping from a raw failure to an [`ErrorCategory`]
//! - **Recovery Strategy Table**: Category and retry count to a [`RecoveryAction`] with
//!   capped exponential backoff
//! - **Recovery Executor**: Performs the chosen action through optional hooks
//! - **Account Health**: Bounded per-account failure history and a derived 0-100 score
//! - **Events**: Typed [`PoolEvent`]s on a non-blocking bounded channel
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - The remote protocol client
//! - Credential or proxy storage
//! - Application-specific concerns
//!
//! Those are reached through [`SessionHandle`] and the hook traits in [`recovery`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └──────┬──────────────────────▲───────────┘
//!        │ checkout / return    │ RecoveryResult
//!        ▼                      │
//! ┌──────────────────┐   ┌──────┴───────────────────┐
//! │ Connection Pool  │◄──┤   Recovery Executor      │
//! │ (per account)    │   │  (one side effect)       │
//! └──────┬───────────┘   └──┬─────────┬─────────────┘
//!        │                  │         │
//!        │            ┌─────▼────┐ ┌──▼─────────────┐
//!        │            │Classifier│ │ Strategy Table │
//!        │            └─────┬────┘ └────────────────┘
//!        │                  ▼
//!        │           ┌────────────────┐
//!        │           │ Account Health │
//!        │           └────────────────┘
//!        ▼
//!   PoolEvent channel → observability task
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use tether_core_resilience::prelude::*;
//! use std::sync::Arc;
//!
//! struct Session;
//!
//! #[async_trait::async_trait]
//! impl SessionHandle for Session {
//!     fn is_connected(&self) -> bool { true }
//!     async fn disconnect(&self) {}
//! }
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let pool = Arc::new(ConnectionPool::<Session>::new(PoolConfig::default()));
//! let executor = RecoveryExecutor::new(RecoveryConfig::default())
//!     .with_connections(pool.clone());
//!
//! if let Some(conn) = pool.checkout("acct-1", || async { Ok(Session) }).await? {
//!     // On failure, ask the executor what to do next
//!     let failure = RawFailure::new("FloodWaitError", "flood wait of 45 seconds");
//!     let result = executor.handle_error("acct-1", "send_message", 0, &failure).await;
//!     assert!(!result.should_retry);
//!
//!     pool.return_connection("acct-1", conn, true).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod account_health;
pub mod classifier;
pub mod connection_pool;
pub mod context;
pub mod error;
pub mod events;
pub mod recovery;
pub mod strategy;

// Re-export main types for convenience
pub use account_health::AccountHealthTracker;
pub use classifier::{classify, classify_failure, Classification, ErrorCategory, ProviderError, RawFailure};
pub use connection_pool::{
    AccountConnections, AccountStats, ConnectionPool, ConnectionState, PoolConfig, PoolStats,
    PooledConnection, SessionHandle,
};
pub use context::ErrorContext;
pub use error::ResilienceError;
pub use events::{CloseReason, EventSink, PoolEvent};
pub use recovery::{
    AccountState, AccountStateHook, ProxyDescriptor, ProxyRotationHook, ReconnectHook,
    RecoveryConfig, RecoveryExecutor, RecoveryFailure, RecoveryHooks, RecoveryResult, ReloginHook,
};
pub use strategy::{RecoveryAction, RecoveryStrategyTable, StrategyDecision};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tether_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::account_health::AccountHealthTracker;
    pub use super::classifier::{ErrorCategory, ProviderError, RawFailure};
    pub use super::connection_pool::{ConnectionPool, PoolConfig, PooledConnection, SessionHandle};
    pub use super::context::ErrorContext;
    pub use super::error::ResilienceError;
    pub use super::events::{EventSink, PoolEvent};
    pub use super::recovery::{RecoveryConfig, RecoveryExecutor, RecoveryHooks, RecoveryResult};
    pub use super::strategy::RecoveryAction;
}
