//! Error classification: raw provider failures to a canonical category
//!
//! Every failure reported by a remote session ends up here before any
//! recovery decision is made. The classifier is a pure function of the
//! failure's type name and message, so it can be exercised in tests with
//! plain strings instead of real provider errors.
//!
//! # Ordering
//!
//! Patterns are checked in a fixed order and the first match wins:
//!
//! 1. Flood control (a declared wait is extracted)
//! 2. Ban / deactivation
//! 3. Authorization / session expiry
//! 4. Proxy
//! 5. Network / timeout / connection reset
//! 6. Local session storage (database locks)
//! 7. Rate limits without a declared wait
//! 8. Temporary server errors (429/500/502/503/504)
//! 9. Anything else is `Unknown`
//!
//! # Example
//!
//! ```
//! use tether_core_resilience::classifier::{classify, ErrorCategory};
//!
//! let c = classify("FloodWaitError", "flood wait of 45 seconds");
//! assert_eq!(c.category, ErrorCategory::RateLimit);
//! assert_eq!(c.wait_seconds(), Some(45));
//! ```

use crate::error::ResilienceError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Wait applied when a flood-control error declares no usable duration
pub const DEFAULT_FLOOD_WAIT_SECS: u64 = 300;

/// Key under which the extracted flood wait is stored in [`Classification::extra`]
pub const EXTRA_WAIT_SECONDS: &str = "wait_seconds";

/// Canonical failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Timeouts, resets, refused connections
    Network,
    /// Proxy handshake or tunnel failures
    Proxy,
    /// Expired or revoked authorization
    Auth,
    /// Provider-enforced rate limit or flood wait
    RateLimit,
    /// Local session storage problems (locked database, corrupt session)
    Session,
    /// Account banned or deactivated
    Banned,
    /// Temporary provider-side failure
    Server,
    /// Nothing matched
    Unknown,
}

impl ErrorCategory {
    /// All categories in classification order
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Network,
        ErrorCategory::Proxy,
        ErrorCategory::Auth,
        ErrorCategory::RateLimit,
        ErrorCategory::Session,
        ErrorCategory::Banned,
        ErrorCategory::Server,
        ErrorCategory::Unknown,
    ];

    /// Stable lowercase name, also used as a configuration key
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Proxy => "proxy",
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Session => "session",
            ErrorCategory::Banned => "banned",
            ErrorCategory::Server => "server",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ErrorCategory::ALL
            .iter()
            .copied()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown error category '{}'", s))
    }
}

/// Result of classifying one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Canonical category
    pub category: ErrorCategory,
    /// Extracted metadata (declared wait, matched pattern, status code)
    pub extra: Map<String, Value>,
}

impl Classification {
    fn new(category: ErrorCategory) -> Self {
        Self {
            category,
            extra: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Flood wait in seconds, present only for flood-control failures
    pub fn wait_seconds(&self) -> Option<u64> {
        self.extra.get(EXTRA_WAIT_SECONDS).and_then(Value::as_u64)
    }
}

/// A provider failure as seen at the classifier boundary.
///
/// Provider-specific error types implement this so the rest of the system
/// never has to know about the provider's error hierarchy.
pub trait ProviderError {
    /// Name of the error type (e.g. `FloodWaitError`)
    fn type_name(&self) -> String;

    /// Human-readable message
    fn message(&self) -> String;

    /// Wait duration declared by the provider itself, if any
    fn declared_wait_seconds(&self) -> Option<u64> {
        None
    }
}

/// A failure described by plain strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFailure {
    pub type_name: String,
    pub message: String,
    pub declared_wait_seconds: Option<u64>,
}

impl RawFailure {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            declared_wait_seconds: None,
        }
    }

    /// Attach the provider's declared wait
    pub fn with_declared_wait(mut self, seconds: u64) -> Self {
        self.declared_wait_seconds = Some(seconds);
        self
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl ProviderError for RawFailure {
    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn declared_wait_seconds(&self) -> Option<u64> {
        self.declared_wait_seconds
    }
}

impl ProviderError for std::io::Error {
    fn type_name(&self) -> String {
        format!("{:?}", self.kind())
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

impl ProviderError for ResilienceError {
    fn type_name(&self) -> String {
        match self {
            ResilienceError::PoolStopped => "PoolStopped",
            ResilienceError::ConnectionCreation(_) => "ConnectionCreation",
            ResilienceError::UnhealthyConnection(_) => "UnhealthyConnection",
            ResilienceError::HookFailed { .. } => "HookFailed",
            ResilienceError::HookTimeout { .. } => "HookTimeout",
            ResilienceError::Transient(_) => "Transient",
            ResilienceError::Permanent(_) => "Permanent",
            ResilienceError::Timeout(_) => "Timeout",
        }
        .to_string()
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

const FLOOD_PATTERNS: &[&str] = &[
    "floodwait",
    "flood_wait",
    "flood wait",
    "flood control",
    "floodtest",
    "slowmodewait",
    "slowmode wait",
    "retry after",
    "a wait of",
];

const BANNED_PATTERNS: &[&str] = &[
    "userdeactivated",
    "user_deactivated",
    "deactivated",
    "phonenumberbanned",
    "phone_number_banned",
    "banned",
    "account suspended",
    "account terminated",
];

const AUTH_PATTERNS: &[&str] = &[
    "authkeyunregistered",
    "auth_key_unregistered",
    "authkeyduplicated",
    "auth key",
    "sessionrevoked",
    "session revoked",
    "session_revoked",
    "sessionexpired",
    "session expired",
    "session_expired",
    "sessionpasswordneeded",
    "password needed",
    "unauthorized",
    "not authorized",
    "login required",
];

const PROXY_PATTERNS: &[&str] = &["proxy", "socks", "tunnel"];

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "timedout",
    "connection reset",
    "connectionreset",
    "connection refused",
    "connectionrefused",
    "connection aborted",
    "connectionaborted",
    "connection closed",
    "connectionerror",
    "connection error",
    "broken pipe",
    "brokenpipe",
    "notconnected",
    "not connected",
    "unreachable",
    "network",
    "unexpected eof",
    "disconnected",
];

const SESSION_PATTERNS: &[&str] = &[
    "database is locked",
    "database locked",
    "sqlite",
    "database",
    "session lock",
    "session file",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "peerflood",
    "peer_flood",
    "peer flood",
    "rate limit",
    "ratelimit",
    "rate_limit",
    "too many requests",
    "slow down",
];

const SERVER_PATTERNS: &[&str] = &[
    "internal server error",
    "service unavailable",
    "bad gateway",
    "server error",
    "rpccallfail",
    "rpc_call_fail",
];

static ANCHORED_WAIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:wait of|flood_wait_|retry after)\s*(\d+)|(\d+)\s*sec")
        .expect("valid wait regex")
});

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("valid integer regex"));

static SERVER_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(429|500|502|503|504)\b").expect("valid status regex"));

/// Wait stated in a flood message. Numbers next to a wait phrase or a
/// seconds unit win over leading error codes such as `[420 FLOOD_WAIT_X]`.
fn message_wait(message: &str) -> Option<u64> {
    ANCHORED_WAIT
        .captures(message)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .or_else(|| FIRST_INTEGER.captures(message).and_then(|c| c.get(1)))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

fn first_match(haystack: &str, patterns: &[&'static str]) -> Option<&'static str> {
    patterns.iter().copied().find(|p| haystack.contains(p))
}

/// Classify a failure from its type name and message.
///
/// Equivalent to [`classify_with_declared_wait`] with no declared wait.
pub fn classify(type_name: &str, message: &str) -> Classification {
    classify_with_declared_wait(type_name, message, None)
}

/// Classify a failure, preferring a provider-declared flood wait when present.
pub fn classify_with_declared_wait(
    type_name: &str,
    message: &str,
    declared_wait: Option<u64>,
) -> Classification {
    let haystack = format!("{} {}", type_name, message).to_lowercase();

    if let Some(pattern) = first_match(&haystack, FLOOD_PATTERNS) {
        let (wait, source) = match declared_wait {
            Some(seconds) => (seconds, "declared"),
            None => match message_wait(message) {
                Some(seconds) => (seconds, "message"),
                None => (DEFAULT_FLOOD_WAIT_SECS, "default"),
            },
        };
        return Classification::new(ErrorCategory::RateLimit)
            .with("pattern", pattern)
            .with(EXTRA_WAIT_SECONDS, wait)
            .with("wait_source", source);
    }

    let ordered: [(ErrorCategory, &[&'static str]); 6] = [
        (ErrorCategory::Banned, BANNED_PATTERNS),
        (ErrorCategory::Auth, AUTH_PATTERNS),
        (ErrorCategory::Proxy, PROXY_PATTERNS),
        (ErrorCategory::Network, NETWORK_PATTERNS),
        (ErrorCategory::Session, SESSION_PATTERNS),
        (ErrorCategory::RateLimit, RATE_LIMIT_PATTERNS),
    ];
    for (category, patterns) in ordered {
        if let Some(pattern) = first_match(&haystack, patterns) {
            return Classification::new(category).with("pattern", pattern);
        }
    }

    if let Some(code) = SERVER_STATUS
        .captures(&haystack)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
    {
        return Classification::new(ErrorCategory::Server).with("status_code", code);
    }
    if let Some(pattern) = first_match(&haystack, SERVER_PATTERNS) {
        return Classification::new(ErrorCategory::Server).with("pattern", pattern);
    }

    Classification::new(ErrorCategory::Unknown)
}

/// Classify anything implementing [`ProviderError`]
pub fn classify_failure(error: &dyn ProviderError) -> Classification {
    classify_with_declared_wait(
        &error.type_name(),
        &error.message(),
        error.declared_wait_seconds(),
    )
}
