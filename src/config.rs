/*!
 * Configuration types for Tether
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_core_resilience::{ErrorCategory, PoolConfig, RecoveryConfig, RecoveryStrategyTable};

use crate::error::{Result, TetherError};

/// Main configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Connection pool limits and timeouts
    #[serde(default)]
    pub pool: PoolSettings,

    /// Retry backoff, hook timeouts and per-category overrides
    #[serde(default)]
    pub recovery: RecoverySettings,

    /// Event channel
    #[serde(default)]
    pub events: EventSettings,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[pool]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Idle + active connections allowed per account
    #[serde(default = "default_max_connections")]
    pub max_connections_per_account: usize,

    /// Idle connections unused this long are closed
    #[serde(default = "default_max_idle_time")]
    pub max_idle_time_secs: u64,

    /// Idle connections older than this are closed
    #[serde(default = "default_max_connection_age")]
    pub max_connection_age_secs: u64,

    /// Interval between eviction sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Upper bound on closing one session
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections_per_account: default_max_connections(),
            max_idle_time_secs: default_max_idle_time(),
            max_connection_age_secs: default_max_connection_age(),
            cleanup_interval_secs: default_cleanup_interval(),
            close_timeout_secs: default_close_timeout(),
        }
    }
}

/// `[recovery]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Backoff base for categories without their own
    #[serde(default = "default_base_retry_delay")]
    pub base_retry_delay_secs: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_secs: u64,

    /// Upper bound on a single recovery hook call
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_secs: u64,

    /// Cooldown for rate limits that declare no wait
    #[serde(default = "default_cooldown")]
    pub default_cooldown_secs: u64,

    /// Failures remembered per account
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Per-category overrides, keyed by category name (e.g. `rate_limit`)
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategyOverride>,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            base_retry_delay_secs: default_base_retry_delay(),
            max_retry_delay_secs: default_max_retry_delay(),
            hook_timeout_secs: default_hook_timeout(),
            default_cooldown_secs: default_cooldown(),
            history_capacity: default_history_capacity(),
            strategies: BTreeMap::new(),
        }
    }
}

/// `[recovery.strategies.<category>]` section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategyOverride {
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub base_delay_secs: Option<u64>,
}

/// `[events]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Run the event logger task
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bounded channel size; events beyond it are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Force debug output
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    3
}

fn default_max_idle_time() -> u64 {
    300 // 5 minutes
}

fn default_max_connection_age() -> u64 {
    3600 // 1 hour
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_close_timeout() -> u64 {
    10
}

fn default_base_retry_delay() -> u64 {
    1
}

fn default_max_retry_delay() -> u64 {
    300
}

fn default_hook_timeout() -> u64 {
    30
}

fn default_cooldown() -> u64 {
    300
}

fn default_history_capacity() -> usize {
    50
}

fn default_channel_capacity() -> usize {
    1024
}

impl TetherConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: TetherConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the pool or executor cannot run with
    pub fn validate(&self) -> Result<()> {
        let pool = &self.pool;
        if pool.max_connections_per_account == 0 {
            return Err(invalid("pool.max_connections_per_account must be at least 1"));
        }
        if pool.cleanup_interval_secs == 0 {
            return Err(invalid("pool.cleanup_interval_secs must be greater than 0"));
        }
        if pool.max_idle_time_secs == 0 || pool.max_connection_age_secs == 0 {
            return Err(invalid("pool idle time and connection age must be greater than 0"));
        }

        let recovery = &self.recovery;
        if recovery.max_retry_delay_secs == 0 {
            return Err(invalid("recovery.max_retry_delay_secs must be greater than 0"));
        }
        if recovery.base_retry_delay_secs > recovery.max_retry_delay_secs {
            return Err(invalid(
                "recovery.base_retry_delay_secs must not exceed recovery.max_retry_delay_secs",
            ));
        }
        if recovery.hook_timeout_secs == 0 {
            return Err(invalid("recovery.hook_timeout_secs must be greater than 0"));
        }
        if recovery.history_capacity == 0 {
            return Err(invalid("recovery.history_capacity must be at least 1"));
        }
        for name in recovery.strategies.keys() {
            name.parse::<ErrorCategory>()
                .map_err(|e| invalid(&format!("recovery.strategies: {}", e)))?;
        }

        if self.events.enabled && self.events.channel_capacity == 0 {
            return Err(invalid("events.channel_capacity must be at least 1"));
        }

        Ok(())
    }

    /// Pool settings as the core crate expects them
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections_per_account: self.pool.max_connections_per_account,
            idle_timeout: Duration::from_secs(self.pool.max_idle_time_secs),
            max_connection_age: Duration::from_secs(self.pool.max_connection_age_secs),
            cleanup_interval: Duration::from_secs(self.pool.cleanup_interval_secs),
            close_timeout: Duration::from_secs(self.pool.close_timeout_secs),
        }
    }

    /// Recovery settings as the core crate expects them
    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            hook_timeout: Duration::from_secs(self.recovery.hook_timeout_secs),
            default_cooldown: Duration::from_secs(self.recovery.default_cooldown_secs),
            base_retry_delay: Duration::from_secs(self.recovery.base_retry_delay_secs),
            max_retry_delay: Duration::from_secs(self.recovery.max_retry_delay_secs),
            history_capacity: self.recovery.history_capacity,
        }
    }

    /// Standard strategy table with the configured overrides applied
    pub fn strategy_table(&self) -> Result<RecoveryStrategyTable> {
        let mut table = RecoveryStrategyTable::new(
            Duration::from_secs(self.recovery.base_retry_delay_secs),
            Duration::from_secs(self.recovery.max_retry_delay_secs),
        );
        for (name, strategy) in &self.recovery.strategies {
            let category = name
                .parse::<ErrorCategory>()
                .map_err(|e| invalid(&format!("recovery.strategies: {}", e)))?;
            table = table.with_override(
                category,
                strategy.max_retries,
                strategy.base_delay_secs.map(Duration::from_secs),
            );
        }
        Ok(table)
    }

    /// Few sessions per account, long backoff, generous cooldowns
    pub fn conservative_preset() -> Self {
        let mut strategies = BTreeMap::new();
        strategies.insert(
            ErrorCategory::Network.to_string(),
            StrategyOverride {
                max_retries: Some(2),
                base_delay_secs: Some(10),
            },
        );
        Self {
            pool: PoolSettings {
                max_connections_per_account: 1,
                max_idle_time_secs: 120,
                ..Default::default()
            },
            recovery: RecoverySettings {
                base_retry_delay_secs: 5,
                max_retry_delay_secs: 600,
                default_cooldown_secs: 900,
                strategies,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// More sessions per account, short backoff
    pub fn aggressive_preset() -> Self {
        Self {
            pool: PoolSettings {
                max_connections_per_account: 5,
                max_idle_time_secs: 600,
                cleanup_interval_secs: 30,
                ..Default::default()
            },
            recovery: RecoverySettings {
                base_retry_delay_secs: 1,
                max_retry_delay_secs: 60,
                hook_timeout_secs: 10,
                default_cooldown_secs: 120,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn invalid(message: &str) -> TetherError {
    TetherError::Config(message.to_string())
}
