//! Error Types
//!
//! Store, stop and configuration failures.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Persistence-layer failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Corrupt journal: {0}")]
    Corrupt(String),
    #[error("Store task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// Stop coordinator failed to stop a workspace
#[derive(Error, Debug)]
pub enum StopError {
    #[error("stop rejected: {0}")]
    Rejected(String),
    #[error("stop coordinator unavailable: {0}")]
    Unavailable(String),
    #[error("stop timed out after {0:?}")]
    TimedOut(Duration),
}

/// Invalid idle timeout or sweeper setting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value_ms}ms")]
    NonPositive { name: &'static str, value_ms: i64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl ConfigError {
    /// Reject zero durations
    pub fn check_duration(name: &'static str, value: Duration) -> Result<Duration, ConfigError> {
        if value.is_zero() {
            Err(ConfigError::NonPositive { name, value_ms: 0 })
        } else {
            Ok(value)
        }
    }
}

/// Tracker failure: bad timeout or store fault
#[derive(Error, Debug)]
pub enum TrackError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_duration() {
        assert!(ConfigError::check_duration("interval", Duration::from_millis(1)).is_ok());
        assert_eq!(
            ConfigError::check_duration("interval", Duration::ZERO),
            Err(ConfigError::NonPositive {
                name: "interval",
                value_ms: 0
            })
        );
    }

    #[test]
    fn test_messages() {
        let err = ConfigError::NonPositive {
            name: "idle timeout",
            value_ms: -1,
        };
        assert_eq!(err.to_string(), "idle timeout must be positive, got -1ms");

        let err = StopError::TimedOut(Duration::from_secs(2));
        assert_eq!(err.to_string(), "stop timed out after 2s");
    }
}
