//! Immutable record of one classified failure

use crate::classifier::{classify_failure, Classification, ErrorCategory, ProviderError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One failure of one operation on one account.
///
/// Built once per failure and never mutated afterwards; the executor hands a
/// copy to the health tracker's history and to the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub account_key: String,
    /// `"{type}: {message}"` as reported by the provider
    pub raw_error: String,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
    /// Number of recovery attempts already made for this operation
    pub retry_count: u32,
    /// Name of the operation that failed (e.g. `send_message`)
    pub operation: String,
    pub extra: Map<String, Value>,
}

impl ErrorContext {
    /// Classify `error` and capture it with the current time
    pub fn capture(
        account_key: impl Into<String>,
        operation: impl Into<String>,
        retry_count: u32,
        error: &dyn ProviderError,
    ) -> Self {
        let raw_error = format!("{}: {}", error.type_name(), error.message());
        Self::from_classification(
            account_key,
            operation,
            retry_count,
            raw_error,
            classify_failure(error),
        )
    }

    pub fn from_classification(
        account_key: impl Into<String>,
        operation: impl Into<String>,
        retry_count: u32,
        raw_error: impl Into<String>,
        classification: Classification,
    ) -> Self {
        Self {
            account_key: account_key.into(),
            raw_error: raw_error.into(),
            category: classification.category,
            timestamp: Utc::now(),
            retry_count,
            operation: operation.into(),
            extra: classification.extra,
        }
    }

    /// Replace the capture time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp_unix(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Flood wait extracted by the classifier
    pub fn wait_seconds(&self) -> Option<u64> {
        self.extra
            .get(crate::classifier::EXTRA_WAIT_SECONDS)
            .and_then(Value::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RawFailure;

    #[test]
    fn test_capture_classifies() {
        let failure = RawFailure::new("FloodWaitError", "flood wait of 45 seconds");
        let ctx = ErrorContext::capture("acct-1", "send_message", 0, &failure);

        assert_eq!(ctx.account_key, "acct-1");
        assert_eq!(ctx.category, ErrorCategory::RateLimit);
        assert_eq!(ctx.wait_seconds(), Some(45));
        assert_eq!(ctx.raw_error, "FloodWaitError: flood wait of 45 seconds");
    }

    #[test]
    fn test_serializes_to_json() {
        let failure = RawFailure::new("TimeoutError", "connection timed out");
        let ctx = ErrorContext::capture("acct-1", "lookup", 2, &failure);

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["category"], "network");
        assert_eq!(json["retry_count"], 2);
    }
}
