use thiserror::Error;

use crate::timer::TimerClass;

#[derive(Error, Debug)]
pub enum RefreshError {
    /// Append or read against the event log failed. The state stays at the
    /// last durably recorded entry and no timers are touched.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A compare-and-set append found a different latest entry than the one
    /// its transition was computed from. Another writer got there first.
    #[error("Log changed underneath append: expected latest {expected:?}, found {found:?}")]
    LogConflict {
        expected: Option<i64>,
        found: Option<i64>,
    },

    /// Arming or cancelling a wake-up failed. Non-fatal: the transition that
    /// requested it is already committed.
    #[error("Timer scheduling failed for {class}: {message}")]
    TimerScheduling { class: TimerClass, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown {kind}: {value}")]
    UnknownName { kind: &'static str, value: String },

    #[error("Data directory not initialized. Run 'eye-refresh init' first.")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl RefreshError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::LogConflict { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::LogConflict { .. })
    }

    pub fn is_timer(&self) -> bool {
        matches!(self, Self::TimerScheduling { .. })
    }

    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownName {
            kind,
            value: value.into(),
        }
    }

    pub fn timer(class: TimerClass, message: impl std::fmt::Display) -> Self {
        Self::TimerScheduling {
            class,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RefreshError>;
