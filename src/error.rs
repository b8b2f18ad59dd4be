//! Error taxonomy for the acquisition → persistence pipeline.
//!
//! Per-event errors (`CoercionError`, `SinkError` on append) are contained at the
//! consumer loop's iteration boundary. Only construction-time failures (channel,
//! sink probe, config, logger, signal listener) are fatal.

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::acquisition::reading::PropertyCode;
use crate::lifecycle::shutdown::LifecycleState;
use crate::persistence::coercion::CoercionRule;

/// Reading Channel errors. `Empty` is the normal timeout path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("reading channel full, rejected reading for {property_code}")]
    Full { property_code: PropertyCode },

    #[error("no reading arrived before the timeout")]
    Empty,

    #[error("reading channel disconnected")]
    Disconnected,

    #[error("reading channel capacity must be at least 1")]
    ZeroCapacity,
}

/// A raw value could not be parsed under its property's rule.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("cannot coerce {raw:?} for {property_code} as {rule}: {reason}")]
pub struct CoercionError {
    pub property_code: PropertyCode,
    pub raw: String,
    pub rule: CoercionRule,
    pub reason: String,
}

/// Failures reported by a meter driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("meter connection failed: {0}")]
    Connect(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Producer Adapter lifecycle errors.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("acquisition already running")]
    AlreadyRunning,

    #[error("acquisition did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("meter driver unavailable (abandoned after an earlier stop timeout)")]
    DriverUnavailable,

    #[error("acquisition thread panicked")]
    Panicked,

    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Record Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid destination filename format {0:?}")]
    InvalidFilenameFormat(String),
}

impl SinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Shutdown Coordinator transition refused (state only moves forward).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid lifecycle transition {from:?} -> {to:?}")]
pub struct LifecycleError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Settings loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value {value:?} in environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Logger installation errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log level {0:?}")]
    Level(String),

    #[error(transparent)]
    SetLogger(#[from] log::SetLoggerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercion_error_carries_context() {
        let err = CoercionError {
            property_code: PropertyCode::new("E7"),
            raw: "12a".into(),
            rule: CoercionRule::Integer,
            reason: "invalid digit found in string".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("E7"));
        assert!(msg.contains("\"12a\""));
        assert!(msg.contains("integer"));
    }

    #[test]
    fn test_stop_timeout_mentions_grace() {
        let err = ProducerError::StopTimeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_lifecycle_error_names_states() {
        let err = LifecycleError {
            from: LifecycleState::Stopped,
            to: LifecycleState::Stopping,
        };
        assert!(err.to_string().contains("Stopped -> Stopping"));
    }
}
