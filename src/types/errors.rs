//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Protocol
//! level problems (unknown verbs, malformed commands) are never errors: they
//! are logged and dropped by the read loop. What remains here are the
//! failures a caller has to react to.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the watchdog.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or identifier.
    #[error("validation error: {0}")]
    Validation(String),

    /// The watchdog process or its channel could not be created.
    #[error("spawn error: {0}")]
    Spawn(String),

    /// Writing to the command channel failed (watchdog gone or channel closed).
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration file could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session detachment errors.
    #[cfg(unix)]
    #[error("system error: {0}")]
    Sys(#[from] nix::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_kind() {
        assert_eq!(
            Error::validation("period must be positive").to_string(),
            "validation error: period must be positive"
        );
        assert_eq!(Error::spawn("no such file").to_string(), "spawn error: no such file");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
