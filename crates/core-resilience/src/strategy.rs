//! Recovery strategy table: category and retry count to a recovery action
//!
//! Each [`ErrorCategory`] owns an ordered action sequence, a retry budget and
//! a base delay. The action for attempt `n` is `sequence[min(n, len - 1)]`,
//! and the delay grows exponentially from the base delay up to a ceiling:
//!
//! ```text
//! delay(n) = min(base × 2^n, max_retry_delay)
//! ```
//!
//! Retry-type actions requested after the budget is spent turn into
//! [`RecoveryAction::Skip`].
//!
//! # Example
//!
//! ```
//! use tether_core_resilience::classifier::ErrorCategory;
//! use tether_core_resilience::strategy::{RecoveryAction, RecoveryStrategyTable};
//! use std::time::Duration;
//!
//! let table = RecoveryStrategyTable::default();
//! let decision = table.decide(ErrorCategory::Network, 1);
//! assert_eq!(decision.action, RecoveryAction::RetryWithDelay);
//! assert_eq!(decision.delay, Duration::from_secs(10));
//! ```

use crate::classifier::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// What to do about a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Retry immediately
    Retry,
    /// Retry after the backoff delay
    RetryWithDelay,
    /// Ask the proxy inventory for a different proxy, then retry
    SwitchProxy,
    /// Drop and re-establish the session, then retry
    Reconnect,
    /// Log in again, then retry
    ReAuth,
    /// Park the account for the provider-declared wait
    Cooldown,
    /// Take the account out of rotation permanently
    Disable,
    /// Tell an operator
    Notify,
    /// Give up on this operation
    Skip,
}

impl RecoveryAction {
    /// Actions that lead back into another attempt of the same operation
    pub fn is_retry_type(&self) -> bool {
        matches!(
            self,
            RecoveryAction::Retry
                | RecoveryAction::RetryWithDelay
                | RecoveryAction::SwitchProxy
                | RecoveryAction::Reconnect
                | RecoveryAction::ReAuth
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::RetryWithDelay => "retry_with_delay",
            RecoveryAction::SwitchProxy => "switch_proxy",
            RecoveryAction::Reconnect => "reconnect",
            RecoveryAction::ReAuth => "re_auth",
            RecoveryAction::Cooldown => "cooldown",
            RecoveryAction::Disable => "disable",
            RecoveryAction::Notify => "notify",
            RecoveryAction::Skip => "skip",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recovery plan for one category
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryStrategy {
    /// Actions indexed by retry count; the last one repeats
    pub actions: Vec<RecoveryAction>,
    /// Retry budget
    pub max_retries: u32,
    /// Backoff base; `None` falls back to the table-wide base delay
    pub base_delay: Option<Duration>,
}

impl CategoryStrategy {
    fn new(actions: &[RecoveryAction], max_retries: u32, base_delay: Option<Duration>) -> Self {
        Self {
            actions: actions.to_vec(),
            max_retries,
            base_delay,
        }
    }

    /// Raw action for the given retry count, ignoring the retry budget
    pub fn action_at(&self, retry_count: u32) -> RecoveryAction {
        let last = self.actions.len().saturating_sub(1);
        self.actions
            .get((retry_count as usize).min(last))
            .copied()
            .unwrap_or(RecoveryAction::Skip)
    }
}

/// Outcome of a table lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyDecision {
    pub action: RecoveryAction,
    /// Backoff delay for this retry count
    pub delay: Duration,
    pub max_retries: u32,
    /// True when a retry-type action was replaced by `Skip`
    pub exhausted: bool,
}

/// Static mapping from `(ErrorCategory, retry_count)` to an action and delay
#[derive(Debug, Clone)]
pub struct RecoveryStrategyTable {
    strategies: HashMap<ErrorCategory, CategoryStrategy>,
    base_retry_delay: Duration,
    max_retry_delay: Duration,
}

impl Default for RecoveryStrategyTable {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl RecoveryStrategyTable {
    /// Build the standard table with the given fallback base and ceiling
    pub fn new(base_retry_delay: Duration, max_retry_delay: Duration) -> Self {
        use RecoveryAction::*;

        let secs = |s: u64| Some(Duration::from_secs(s));
        let strategies = HashMap::from([
            (
                ErrorCategory::Network,
                CategoryStrategy::new(&[Retry, RetryWithDelay, Reconnect], 3, secs(5)),
            ),
            (
                ErrorCategory::Proxy,
                CategoryStrategy::new(&[SwitchProxy, Retry], 2, secs(10)),
            ),
            (
                ErrorCategory::Auth,
                CategoryStrategy::new(&[ReAuth, Notify], 1, secs(0)),
            ),
            (
                ErrorCategory::RateLimit,
                CategoryStrategy::new(&[Cooldown], 1, None),
            ),
            (
                ErrorCategory::Session,
                CategoryStrategy::new(&[RetryWithDelay, Reconnect], 3, secs(2)),
            ),
            (
                ErrorCategory::Banned,
                CategoryStrategy::new(&[Disable, Notify], 0, None),
            ),
            (
                ErrorCategory::Server,
                CategoryStrategy::new(&[RetryWithDelay, Skip], 3, secs(30)),
            ),
            (
                ErrorCategory::Unknown,
                CategoryStrategy::new(&[Retry, Skip], 2, secs(10)),
            ),
        ]);

        Self {
            strategies,
            base_retry_delay,
            max_retry_delay,
        }
    }

    /// Override the retry budget and/or base delay of one category
    pub fn with_override(
        mut self,
        category: ErrorCategory,
        max_retries: Option<u32>,
        base_delay: Option<Duration>,
    ) -> Self {
        if let Some(strategy) = self.strategies.get_mut(&category) {
            if let Some(max_retries) = max_retries {
                strategy.max_retries = max_retries;
            }
            if base_delay.is_some() {
                strategy.base_delay = base_delay;
            }
        }
        self
    }

    /// Strategy for a category
    pub fn strategy(&self, category: ErrorCategory) -> Option<&CategoryStrategy> {
        self.strategies.get(&category)
    }

    pub fn max_retries(&self, category: ErrorCategory) -> u32 {
        self.strategy(category).map(|s| s.max_retries).unwrap_or(0)
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// Backoff delay: `min(base × 2^retry_count, max_retry_delay)`
    pub fn delay(&self, category: ErrorCategory, retry_count: u32) -> Duration {
        let base = self
            .strategy(category)
            .and_then(|s| s.base_delay)
            .unwrap_or(self.base_retry_delay);

        let factor = 2f64.powi(retry_count.min(64) as i32);
        let secs = (base.as_secs_f64() * factor).min(self.max_retry_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Raw action for a retry count, ignoring the retry budget
    pub fn action(&self, category: ErrorCategory, retry_count: u32) -> RecoveryAction {
        self.strategy(category)
            .map(|s| s.action_at(retry_count))
            .unwrap_or(RecoveryAction::Skip)
    }

    /// Action and delay for a retry count, with the retry budget applied
    pub fn decide(&self, category: ErrorCategory, retry_count: u32) -> StrategyDecision {
        let max_retries = self.max_retries(category);
        let mut action = self.action(category, retry_count);
        let mut exhausted = false;

        if action.is_retry_type() && retry_count >= max_retries {
            action = RecoveryAction::Skip;
            exhausted = true;
        }

        StrategyDecision {
            action,
            delay: self.delay(category, retry_count),
            max_retries,
            exhausted,
        }
    }
}
