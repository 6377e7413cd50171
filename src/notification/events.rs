use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::{Event, LogEntry, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RefreshReminder,
    RefreshComplete,
}

impl NotificationKind {
    pub fn for_state(state: State) -> Option<Self> {
        match state {
            State::ReminderSent => Some(Self::RefreshReminder),
            State::RefreshTimeUp => Some(Self::RefreshComplete),
            State::Paused | State::ReminderScheduled | State::RefreshHappening => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshReminder => "refresh_reminder",
            Self::RefreshComplete => "refresh_complete",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::RefreshReminder => "Eye Refresh",
            Self::RefreshComplete => "Eye Refresh Complete",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::RefreshReminder => "Time for your eye refresh!",
            Self::RefreshComplete => "Great job! Your eye refresh is complete.",
        }
    }

    /// Actions offered with the notification, in display order.
    pub fn options(&self) -> &'static [NotificationOption] {
        match self {
            Self::RefreshReminder => REMINDER_OPTIONS,
            Self::RefreshComplete => COMPLETE_OPTIONS,
        }
    }
}

const REMINDER_OPTIONS: &[NotificationOption] = &[
    NotificationOption::new("Start refresh", Event::RefreshStarted),
    NotificationOption::new("Snooze", Event::SnoozeRequested),
    NotificationOption::new("Pause", Event::SchedulingPaused),
];

const COMPLETE_OPTIONS: &[NotificationOption] = &[
    NotificationOption::new("Done", Event::RefreshCompleted),
    NotificationOption::new("Couldn't", Event::RefreshCancelled),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationOption {
    pub label: &'static str,
    pub event: Event,
}

impl NotificationOption {
    const fn new(label: &'static str, event: Event) -> Self {
        Self { label, event }
    }
}

/// A committed transition as seen by the notification layer.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionNotice {
    pub entry: LogEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<NotificationKind>,
    pub created_at: DateTime<Utc>,
}

impl TransitionNotice {
    pub fn new(entry: LogEntry) -> Self {
        Self {
            kind: NotificationKind::for_state(entry.state),
            entry,
            created_at: Utc::now(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        self.entry
            .causing_event
            .map(|event| event.as_str())
            .unwrap_or("none")
    }

    pub fn body(&self) -> String {
        let Some(kind) = self.kind else {
            return format!("Now {}", self.entry.state);
        };

        let actions: Vec<String> = kind
            .options()
            .iter()
            .map(|option| format!("{} ({})", option.label, option.event))
            .collect();
        format!("{}\nReply: {}", kind.message(), actions.join(", "))
    }

    pub fn log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} -> {}",
            self.entry.recorded_at().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.event_name(),
            self.entry.state.as_str()
        );
        if self.entry.reminder_deadline > 0 {
            line.push_str(&format!(" deadline={}", self.entry.reminder_deadline));
        }
        if let Some(kind) = self.kind {
            line.push_str(&format!(" notify={}", kind.as_str()));
        }
        line.push('\n');
        line
    }
}
