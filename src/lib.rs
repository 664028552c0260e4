/*!
 * Tether - pooled remote sessions with typed failure recovery
 *
 * Keeps many long-lived account sessions alive against a service that
 * rate-limits, drops connections and bans accounts:
 * - Per-account connection pool with capacity limits and idle eviction
 * - Pure error classification into a fixed category taxonomy
 * - Bounded, table-driven recovery actions with exponential backoff
 * - Per-account health scores from recent failure history
 * - TOML configuration, structured logging, and event-driven statistics
 *
 * The pool and recovery logic live in `tether-core-resilience`; this crate
 * wires them to configuration, logging and observability.
 */

pub mod config;
pub mod error;
pub mod instrumentation;
pub mod logging;
pub mod observability;
pub mod runtime;

// Re-export commonly used types
pub use config::{LogLevel, LoggingConfig, TetherConfig};
pub use error::{Result, TetherError};
pub use instrumentation::{RecoveryStats, StatsSnapshot};
pub use runtime::{SessionRuntime, SessionRuntimeBuilder};
pub use tether_core_resilience as core;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
