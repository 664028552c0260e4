//! Error types for the resilience crate

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in pool and recovery operations
#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    /// The pool has been stopped and no longer hands out connections
    #[error("Connection pool is stopped")]
    PoolStopped,

    /// Connection creation failed
    #[error("Failed to create connection: {0}")]
    ConnectionCreation(String),

    /// Connection is unhealthy
    #[error("Connection is unhealthy: {0}")]
    UnhealthyConnection(String),

    /// An external recovery hook reported failure
    #[error("Recovery hook '{hook}' failed: {message}")]
    HookFailed { hook: String, message: String },

    /// An external recovery hook did not finish in time
    #[error("Recovery hook '{hook}' timed out after {timeout:?}")]
    HookTimeout { hook: String, timeout: Duration },

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Timeout occurred
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),
}

impl ResilienceError {
    /// Build a hook failure from any displayable error
    pub fn hook_failed(hook: &str, message: impl ToString) -> Self {
        ResilienceError::HookFailed {
            hook: hook.to_string(),
            message: message.to_string(),
        }
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_)
                | ResilienceError::Timeout(_)
                | ResilienceError::HookTimeout { .. }
                | ResilienceError::ConnectionCreation(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_) | ResilienceError::PoolStopped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = ResilienceError::Transient("network error".to_string());
        assert!(transient.is_transient());
        assert!(!transient.is_permanent());

        let permanent = ResilienceError::Permanent("auth failed".to_string());
        assert!(!permanent.is_transient());
        assert!(permanent.is_permanent());

        assert!(ResilienceError::PoolStopped.is_permanent());
    }

    #[test]
    fn test_hook_error_display() {
        let err = ResilienceError::hook_failed("reconnect", "socket closed");
        assert_eq!(
            err.to_string(),
            "Recovery hook 'reconnect' failed: socket closed"
        );

        let err = ResilienceError::HookTimeout {
            hook: "relogin".to_string(),
            timeout: Duration::from_secs(2),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("relogin"));
    }
}
