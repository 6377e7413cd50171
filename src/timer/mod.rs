//! Wake-up scheduling: one armed timestamp per timer class.
//!
//! - `WakeScheduler`: arm/cancel contract the dispatcher drives
//! - `TokioTimers`: in-process scheduler delivering events over a channel
//! - `DetachedTimers`: records commands for processes that exit immediately
//! - `Clock`: wall-clock source in milliseconds

mod clock;
mod scheduler;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduler::{DetachedTimers, TokioTimers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerClass {
    #[serde(rename = "reminder_alarm")]
    Reminder,
    #[serde(rename = "refresh_alarm")]
    Refresh,
}

impl TimerClass {
    pub const ALL: [TimerClass; 2] = [TimerClass::Reminder, TimerClass::Refresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reminder => "reminder_alarm",
            Self::Refresh => "refresh_alarm",
        }
    }
}

impl fmt::Display for TimerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TimerCommand {
    Arm { class: TimerClass, at_ms: i64 },
    Cancel(TimerClass),
}

impl TimerCommand {
    pub fn class(&self) -> TimerClass {
        match self {
            Self::Arm { class, .. } => *class,
            Self::Cancel(class) => *class,
        }
    }
}

#[async_trait]
pub trait WakeScheduler: Send + Sync {
    /// Replaces any armed timer of `class`.
    async fn arm(&self, class: TimerClass, at_ms: i64) -> Result<()>;

    /// No-op when nothing is armed for `class`.
    async fn cancel(&self, class: TimerClass) -> Result<()>;

    /// Deadline currently pending for `class`, if the scheduler can tell.
    fn armed(&self, _class: TimerClass) -> Option<i64> {
        None
    }

    async fn apply(&self, command: TimerCommand) -> Result<()> {
        match command {
            TimerCommand::Arm { class, at_ms } => self.arm(class, at_ms).await,
            TimerCommand::Cancel(class) => self.cancel(class).await,
        }
    }
}
