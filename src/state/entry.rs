use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::machine::{Event, State};

/// One committed transition. Keyed by `timestamp`; never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub state: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causing_event: Option<Event>,
    /// Scheduled reminder time for `ReminderScheduled` entries, 0 otherwise.
    #[serde(default)]
    pub reminder_deadline: i64,
}

impl LogEntry {
    pub fn new(timestamp: i64, state: State, causing_event: Option<Event>) -> Self {
        Self {
            timestamp,
            state,
            causing_event,
            reminder_deadline: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: i64) -> Self {
        self.reminder_deadline = if self.state == State::ReminderScheduled {
            deadline
        } else {
            0
        };
        self
    }

    pub fn caused_by(&self, event: Event) -> bool {
        self.causing_event == Some(event)
    }

    /// Milliseconds until the recorded reminder deadline; `None` when no
    /// reminder is scheduled by this entry.
    pub fn remaining_ms(&self, now_ms: i64) -> Option<i64> {
        (self.state == State::ReminderScheduled && self.reminder_deadline > 0)
            .then(|| (self.reminder_deadline - now_ms).max(0))
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_default()
    }

    pub fn recorded_at_local(&self) -> DateTime<Local> {
        self.recorded_at().with_timezone(&Local)
    }
}
