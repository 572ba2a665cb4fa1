//! Synchronization tuning knobs.
//!
//! Loaded from JSON by hosts; every field has a default so `{}` is a valid
//! document.

use log::Level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound for `max_events_per_pump`.
pub const MAX_EVENTS_PER_PUMP_LIMIT: usize = 1_000_000;

/// Log level used for data-driven sync irregularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLogLevel {
    Debug,
    Info,
    #[default]
    Warn,
}

impl IssueLogLevel {
    pub fn as_level(self) -> Level {
        match self {
            Self::Debug => Level::Debug,
            Self::Info => Level::Info,
            Self::Warn => Level::Warn,
        }
    }
}

/// Panel synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Events drained per pump; `0` drains everything queued.
    pub max_events_per_pump: usize,
    pub issue_log_level: IssueLogLevel,
    /// Collapse all structural events of one pump into a single full pass.
    ///
    /// When off, every structural event runs its own pass.
    pub coalesce_structural_events: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_events_per_pump: 1024,
            issue_log_level: IssueLogLevel::Warn,
            coalesce_structural_events: true,
        }
    }
}

impl SyncConfig {
    /// Parses and validates one JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events_per_pump > MAX_EVENTS_PER_PUMP_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "max_events_per_pump",
                message: format!(
                    "{} exceeds limit {MAX_EVENTS_PER_PUMP_LIMIT}",
                    self.max_events_per_pump
                ),
            });
        }
        Ok(())
    }

    /// Drain limit for one pump.
    pub fn drain_limit(&self) -> usize {
        match self.max_events_per_pump {
            0 => usize::MAX,
            limit => limit,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid sync config: {err}"),
            Self::InvalidValue { field, message } => {
                write!(f, "invalid sync config field `{field}`: {message}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}
