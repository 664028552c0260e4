/*!
 * Error types for Tether
 */

use std::fmt;
use std::io;
use tether_core_resilience::ResilienceError;

pub type Result<T> = std::result::Result<T, TetherError>;

#[derive(Debug)]
pub enum TetherError {
    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// TOML parse or serialization error
    Toml(String),

    /// Pool or recovery error from the resilience core
    Resilience(ResilienceError),

    /// Logging setup error
    Logging(String),

    /// Generic error with message
    Other(String),
}

impl TetherError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            // These are fatal - don't retry
            TetherError::Config(_) => true,
            TetherError::Toml(_) => true,
            TetherError::Logging(_) => true,
            TetherError::Resilience(err) => err.is_permanent(),

            // These are not fatal - can retry
            TetherError::Io(_) => false,
            TetherError::Other(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            TetherError::Resilience(err) => err.is_transient(),
            TetherError::Io(io_err) => matches!(
                io_err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl fmt::Display for TetherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TetherError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            TetherError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            TetherError::Toml(msg) => {
                write!(f, "TOML error: {}", msg)
            }
            TetherError::Resilience(err) => {
                write!(f, "{}", err)
            }
            TetherError::Logging(msg) => {
                write!(f, "Logging error: {}", msg)
            }
            TetherError::Other(msg) => {
                write!(f, "{}", msg)
            }
        }
    }
}

impl std::error::Error for TetherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TetherError::Io(err) => Some(err),
            TetherError::Resilience(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TetherError {
    fn from(err: io::Error) -> Self {
        TetherError::Io(err)
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(err: toml::de::Error) -> Self {
        TetherError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for TetherError {
    fn from(err: toml::ser::Error) -> Self {
        TetherError::Toml(err.to_string())
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Other(format!("JSON error: {}", err))
    }
}

impl From<ResilienceError> for TetherError {
    fn from(err: ResilienceError) -> Self {
        TetherError::Resilience(err)
    }
}
