/*!
 * Instrumentation for tracking pool and recovery statistics
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tether_core_resilience::{ErrorCategory, PoolEvent, RecoveryAction};

const ACTIONS: [RecoveryAction; 9] = [
    RecoveryAction::Retry,
    RecoveryAction::RetryWithDelay,
    RecoveryAction::SwitchProxy,
    RecoveryAction::Reconnect,
    RecoveryAction::ReAuth,
    RecoveryAction::Cooldown,
    RecoveryAction::Disable,
    RecoveryAction::Notify,
    RecoveryAction::Skip,
];

/// Thread-safe statistics tracker fed from the event stream
#[derive(Debug, Clone)]
pub struct RecoveryStats {
    inner: Arc<RecoveryStatsInner>,
}

#[derive(Debug)]
struct RecoveryStatsInner {
    // Connection lifecycle
    connections_created: AtomicU64,
    connections_reused: AtomicU64,
    connections_pooled: AtomicU64,
    connections_closed: AtomicU64,

    // Error handling
    errors_handled: AtomicU64,
    retries_advised: AtomicU64,
    errors_by_category: [AtomicU64; 8],
    actions_taken: [AtomicU64; 9],

    // Account-level outcomes
    proxy_rotations: AtomicU64,
    cooldowns: AtomicU64,
    accounts_disabled: AtomicU64,
    operator_notices: AtomicU64,

    // Timing
    start_time: Instant,
}

impl RecoveryStats {
    /// Create a new statistics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecoveryStatsInner {
                connections_created: AtomicU64::new(0),
                connections_reused: AtomicU64::new(0),
                connections_pooled: AtomicU64::new(0),
                connections_closed: AtomicU64::new(0),
                errors_handled: AtomicU64::new(0),
                retries_advised: AtomicU64::new(0),
                errors_by_category: Default::default(),
                actions_taken: Default::default(),
                proxy_rotations: AtomicU64::new(0),
                cooldowns: AtomicU64::new(0),
                accounts_disabled: AtomicU64::new(0),
                operator_notices: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    /// Count one event
    pub fn record(&self, event: &PoolEvent) {
        let inner = &self.inner;
        match event {
            PoolEvent::ConnectionCreated { .. } => {
                inner.connections_created.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::ConnectionReused { .. } => {
                inner.connections_reused.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::ConnectionReturned { pooled, .. } => {
                if *pooled {
                    inner.connections_pooled.fetch_add(1, Ordering::Relaxed);
                }
            }
            PoolEvent::ConnectionClosed { .. } => {
                inner.connections_closed.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::ErrorHandled {
                context,
                action,
                should_retry,
            } => {
                inner.errors_handled.fetch_add(1, Ordering::Relaxed);
                if *should_retry {
                    inner.retries_advised.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(i) = ErrorCategory::ALL.iter().position(|c| *c == context.category) {
                    inner.errors_by_category[i].fetch_add(1, Ordering::Relaxed);
                }
                if let Some(i) = ACTIONS.iter().position(|a| a == action) {
                    inner.actions_taken[i].fetch_add(1, Ordering::Relaxed);
                }
            }
            PoolEvent::ProxyRotated { .. } => {
                inner.proxy_rotations.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::AccountCooldown { .. } => {
                inner.cooldowns.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::AccountDisabled { .. } => {
                inner.accounts_disabled.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::OperatorNotice { .. } => {
                inner.operator_notices.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = &self.inner;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let errors_by_category = ErrorCategory::ALL
            .iter()
            .zip(inner.errors_by_category.iter())
            .map(|(category, count)| (category.to_string(), load(count)))
            .filter(|(_, count)| *count > 0)
            .collect();
        let actions_taken = ACTIONS
            .iter()
            .zip(inner.actions_taken.iter())
            .map(|(action, count)| (action.to_string(), load(count)))
            .filter(|(_, count)| *count > 0)
            .collect();

        StatsSnapshot {
            connections_created: load(&inner.connections_created),
            connections_reused: load(&inner.connections_reused),
            connections_pooled: load(&inner.connections_pooled),
            connections_closed: load(&inner.connections_closed),
            errors_handled: load(&inner.errors_handled),
            retries_advised: load(&inner.retries_advised),
            errors_by_category,
            actions_taken,
            proxy_rotations: load(&inner.proxy_rotations),
            cooldowns: load(&inner.cooldowns),
            accounts_disabled: load(&inner.accounts_disabled),
            operator_notices: load(&inner.operator_notices),
            events_dropped: 0,
            elapsed_secs: inner.start_time.elapsed().as_secs(),
        }
    }

    /// Check if any events have been recorded
    pub fn has_activity(&self) -> bool {
        let inner = &self.inner;
        inner.connections_created.load(Ordering::Relaxed) > 0
            || inner.errors_handled.load(Ordering::Relaxed) > 0
    }
}

impl Default for RecoveryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_pooled: u64,
    pub connections_closed: u64,
    pub errors_handled: u64,
    pub retries_advised: u64,
    /// Non-zero counts only, keyed by category name
    pub errors_by_category: BTreeMap<String, u64>,
    /// Non-zero counts only, keyed by action name
    pub actions_taken: BTreeMap<String, u64>,
    pub proxy_rotations: u64,
    pub cooldowns: u64,
    pub accounts_disabled: u64,
    pub operator_notices: u64,
    /// Events the channel could not deliver; filled in by the runtime
    pub events_dropped: u64,
    pub elapsed_secs: u64,
}

impl StatsSnapshot {
    /// Share of checkouts served from the idle queue, as a percentage
    pub fn reuse_rate(&self) -> f64 {
        let checkouts = self.connections_created + self.connections_reused;
        if checkouts == 0 {
            0.0
        } else {
            (self.connections_reused as f64 / checkouts as f64) * 100.0
        }
    }

    /// Format statistics as a human-readable string
    pub fn format_summary(&self) -> String {
        let join = |map: &BTreeMap<String, u64>| {
            if map.is_empty() {
                "none".to_string()
            } else {
                map.iter()
                    .map(|(name, count)| format!("{}={}", name, count))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        };

        format!(
            "Connections: {} created, {} reused ({:.1}%), {} pooled, {} closed\n\
             Errors: {} handled, {} retried ({})\n\
             Actions: {}\n\
             Accounts: {} cooled down, {} disabled, {} proxy rotations, {} operator notices\n\
             Events dropped: {}\n\
             Elapsed: {} seconds",
            self.connections_created,
            self.connections_reused,
            self.reuse_rate(),
            self.connections_pooled,
            self.connections_closed,
            self.errors_handled,
            self.retries_advised,
            join(&self.errors_by_category),
            join(&self.actions_taken),
            self.cooldowns,
            self.accounts_disabled,
            self.proxy_rotations,
            self.operator_notices,
            self.events_dropped,
            self.elapsed_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core_resilience::{CloseReason, ErrorContext, RawFailure};

    fn handled(type_name: &str, message: &str, action: RecoveryAction, retry: bool) -> PoolEvent {
        PoolEvent::ErrorHandled {
            context: ErrorContext::capture("a", "send", 0, &RawFailure::new(type_name, message)),
            action,
            should_retry: retry,
        }
    }

    #[test]
    fn test_connection_counters() {
        let stats = RecoveryStats::new();
        stats.record(&PoolEvent::ConnectionCreated {
            account_key: "a".into(),
            connection_id: 1,
        });
        stats.record(&PoolEvent::ConnectionReused {
            account_key: "a".into(),
            connection_id: 1,
            use_count: 2,
        });
        stats.record(&PoolEvent::ConnectionReturned {
            account_key: "a".into(),
            connection_id: 1,
            pooled: false,
        });
        stats.record(&PoolEvent::ConnectionClosed {
            account_key: "a".into(),
            connection_id: 1,
            reason: CloseReason::Released,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_created, 1);
        assert_eq!(snapshot.connections_reused, 1);
        assert_eq!(snapshot.connections_pooled, 0);
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.reuse_rate(), 50.0);
    }

    #[test]
    fn test_error_categorization() {
        let stats = RecoveryStats::new();
        stats.record(&handled("TimeoutError", "timed out", RecoveryAction::Retry, true));
        stats.record(&handled("TimeoutError", "timed out", RecoveryAction::Retry, true));
        stats.record(&handled("UserDeactivated", "deactivated", RecoveryAction::Disable, false));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.errors_handled, 3);
        assert_eq!(snapshot.retries_advised, 2);
        assert_eq!(snapshot.errors_by_category.get("network"), Some(&2));
        assert_eq!(snapshot.errors_by_category.get("banned"), Some(&1));
        assert_eq!(snapshot.actions_taken.get("retry"), Some(&2));
        assert!(!snapshot.errors_by_category.contains_key("proxy"));
    }

    #[test]
    fn test_format_summary() {
        let stats = RecoveryStats::new();
        assert!(!stats.has_activity());
        stats.record(&handled("FloodWaitError", "flood wait 5", RecoveryAction::Cooldown, false));
        stats.record(&PoolEvent::AccountCooldown {
            account_key: "a".into(),
            seconds: 5,
        });
        assert!(stats.has_activity());

        let summary = stats.snapshot().format_summary();
        assert!(summary.contains("rate_limit=1"));
        assert!(summary.contains("cooldown=1"));
        assert!(summary.contains("1 cooled down"));
    }

    #[test]
    fn test_thread_safety() {
        use std::thread;

        let stats = RecoveryStats::new();
        let stats_clone = stats.clone();
        let event = PoolEvent::ConnectionCreated {
            account_key: "a".into(),
            connection_id: 1,
        };
        let event_clone = event.clone();

        let handle = thread::spawn(move || {
            for _ in 0..100 {
                stats_clone.record(&event_clone);
            }
        });

        for _ in 0..100 {
            stats.record(&event);
        }

        handle.join().unwrap();
        assert_eq!(stats.snapshot().connections_created, 200);
    }
}
