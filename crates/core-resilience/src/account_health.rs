//! Account Health: rolling per-account error history and health score
//!
//! Every classified failure is appended to a bounded ring buffer for its
//! account. The health score is derived from that buffer on every read and
//! is never stored, so it cannot drift from the history it summarizes.
//!
//! # Scoring
//!
//! Start at 100. For each failure in the last 24 hours subtract 5; banned
//! and auth failures subtract another 20, rate limits another 10. The result
//! is clamped to `0..=100`.
//!
//! # Example
//!
//! ```
//! use tether_core_resilience::account_health::AccountHealthTracker;
//! use tether_core_resilience::classifier::RawFailure;
//! use tether_core_resilience::context::ErrorContext;
//!
//! let tracker = AccountHealthTracker::new(50);
//! assert_eq!(tracker.health_score("acct-1"), 100);
//!
//! let failure = RawFailure::new("TimeoutError", "connection timed out");
//! tracker.record(ErrorContext::capture("acct-1", "send", 0, &failure));
//! assert_eq!(tracker.health_score("acct-1"), 95);
//! ```

use crate::classifier::ErrorCategory;
use crate::context::ErrorContext;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Default ring buffer size per account
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

const SCORE_WINDOW_HOURS: i64 = 24;
const BASE_PENALTY: i64 = 5;
const SEVERE_PENALTY: i64 = 20;
const RATE_LIMIT_PENALTY: i64 = 10;

/// Per-account error history and derived health score
#[derive(Debug)]
pub struct AccountHealthTracker {
    capacity: usize,
    history: Mutex<HashMap<String, VecDeque<ErrorContext>>>,
}

impl Default for AccountHealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl AccountHealthTracker {
    /// Create a tracker keeping at most `capacity` failures per account
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<ErrorContext>>> {
        // Poisoning is ignored: entries are plain data.
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a failure, dropping the oldest entry once the buffer is full
    pub fn record(&self, context: ErrorContext) {
        let mut history = self.lock();
        let entries = history
            .entry(context.account_key.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        entries.push_back(context);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Health score as of now
    pub fn health_score(&self, account_key: &str) -> u8 {
        self.health_score_at(account_key, Utc::now())
    }

    /// Health score as of `now`, counting failures in the preceding 24 hours
    pub fn health_score_at(&self, account_key: &str, now: DateTime<Utc>) -> u8 {
        let history = self.lock();
        let Some(entries) = history.get(account_key) else {
            return 100;
        };

        let window_start = now - ChronoDuration::hours(SCORE_WINDOW_HOURS);
        let penalty: i64 = entries
            .iter()
            .filter(|ctx| ctx.timestamp >= window_start && ctx.timestamp <= now)
            .map(|ctx| {
                BASE_PENALTY
                    + match ctx.category {
                        ErrorCategory::Banned | ErrorCategory::Auth => SEVERE_PENALTY,
                        ErrorCategory::RateLimit => RATE_LIMIT_PENALTY,
                        _ => 0,
                    }
            })
            .sum();

        (100 - penalty).clamp(0, 100) as u8
    }

    /// Whether the account's score is at least `threshold`
    pub fn is_usable(&self, account_key: &str, threshold: u8) -> bool {
        self.health_score(account_key) >= threshold
    }

    /// The most recent `limit` failures, newest last
    pub fn error_history(&self, account_key: &str, limit: usize) -> Vec<ErrorContext> {
        let history = self.lock();
        match history.get(account_key) {
            Some(entries) => {
                let skip = entries.len().saturating_sub(limit);
                entries.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Failure counts per category over the retained history
    pub fn category_counts(&self, account_key: &str) -> BTreeMap<ErrorCategory, usize> {
        let history = self.lock();
        let mut counts = BTreeMap::new();
        if let Some(entries) = history.get(account_key) {
            for ctx in entries {
                *counts.entry(ctx.category).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Forget an account's history (e.g. after it was re-provisioned)
    pub fn clear(&self, account_key: &str) {
        self.lock().remove(account_key);
    }

    /// Accounts with any recorded failure
    pub fn accounts(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
