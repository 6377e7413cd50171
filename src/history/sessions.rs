//! Completed refresh sessions folded out of the transition log.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Serialize;

use crate::state::{Event, LogEntry, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompletedSession {
    pub started_at: i64,
    pub completed_at: i64,
    pub duration_ms: i64,
}

impl CompletedSession {
    pub fn duration_secs(&self) -> i64 {
        self.duration_ms / 1000
    }

    pub fn started_at_local(&self) -> DateTime<Local> {
        Utc.timestamp_millis_opt(self.started_at)
            .single()
            .unwrap_or_default()
            .with_timezone(&Local)
    }
}

/// Pairs each refresh start with the completion that follows it.
///
/// Only the most recent start can be completed; a second start before any
/// completion discards the first.
#[derive(Debug, Default)]
pub struct SessionTracker {
    open_since: Option<i64>,
    sessions: Vec<CompletedSession>,
}

impl SessionTracker {
    pub fn apply(&mut self, entry: &LogEntry) {
        match (entry.state, entry.causing_event) {
            (State::RefreshHappening, Some(Event::RefreshStarted)) => {
                self.open_since = Some(entry.timestamp);
            }
            (State::ReminderScheduled, Some(Event::RefreshCompleted)) => {
                if let Some(started_at) = self.open_since.take() {
                    self.sessions.push(CompletedSession {
                        started_at,
                        completed_at: entry.timestamp,
                        duration_ms: entry.timestamp - started_at,
                    });
                }
            }
            _ => {}
        }
    }

    /// Newest first.
    pub fn finish(mut self) -> Vec<CompletedSession> {
        self.sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        self.sessions
    }
}

/// `entries` must be in ascending timestamp order.
pub fn derive_sessions(entries: &[LogEntry]) -> Vec<CompletedSession> {
    let mut tracker = SessionTracker::default();
    for entry in entries {
        tracker.apply(entry);
    }
    tracker.finish()
}
