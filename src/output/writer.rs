use std::io::{self, Write};

use serde::Serialize;

use crate::cli::{Display, OutputFormat};
use crate::config::RefreshConfig;
use crate::dispatcher::{DispatchOutcome, RecoveryAction, Triggered};
use crate::history::{Bucket, CompletedSession, Range};
use crate::notification::{NotificationKind, NotificationOption};
use crate::state::{LogEntry, State};

/// Routes command results to styled text or one JSON object per line.
pub struct OutputWriter {
    format: OutputFormat,
    display: Display,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            display: Display::new(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn emit_status(&self, latest: Option<&LogEntry>, now_ms: i64) {
        match self.format {
            OutputFormat::Text => self.display.print_status(latest, now_ms),
            OutputFormat::Json => self.write_json(&StatusOutput::new(latest, now_ms)),
        }
    }

    pub fn emit_outcome(&self, outcome: &DispatchOutcome) {
        match self.format {
            OutputFormat::Text => self.display.print_outcome(outcome),
            OutputFormat::Json => self.write_json(outcome),
        }
    }

    pub fn emit_recovery(&self, action: &RecoveryAction) {
        match self.format {
            OutputFormat::Text => self.display.print_recovery(action),
            OutputFormat::Json => self.write_json(action),
        }
    }

    pub fn emit_triggered(&self, triggered: &Triggered) {
        match triggered {
            Triggered::Dispatched(outcome) => self.emit_outcome(outcome),
            Triggered::Recovered(action) => self.emit_recovery(action),
        }
    }

    pub fn emit_history(&self, entries: &[LogEntry]) {
        match self.format {
            OutputFormat::Text => self.display.print_history(entries),
            OutputFormat::Json => self.write_json(&entries),
        }
    }

    pub fn emit_sessions(&self, range: Range, sessions: &[CompletedSession], buckets: &[Bucket]) {
        match self.format {
            OutputFormat::Text => self.display.print_sessions(&range, sessions, buckets),
            OutputFormat::Json => {
                let (start_ms, end_ms) = range.bounds();
                self.write_json(&SessionsOutput {
                    label: range.to_string(),
                    range,
                    start_ms,
                    end_ms,
                    total_ms: sessions.iter().map(|s| s.duration_ms).sum(),
                    sessions,
                    buckets,
                });
            }
        }
    }

    pub fn emit_config(&self, config: &RefreshConfig) {
        match self.format {
            OutputFormat::Text => match toml::to_string_pretty(config) {
                Ok(content) => println!("{}", content),
                Err(e) => self.display.print_error(&e.to_string()),
            },
            OutputFormat::Json => self.write_json(config),
        }
    }

    pub fn emit_message(&self, message: &str) {
        match self.format {
            OutputFormat::Text => self.display.print_success(message),
            OutputFormat::Json => self.write_json(&MessageOutput { message }),
        }
    }

    pub fn emit_error(&self, message: &str) {
        match self.format {
            OutputFormat::Text => self.display.print_error(message),
            OutputFormat::Json => self.write_json(&ErrorOutput { error: message }),
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, value: &T) {
        if let Ok(json) = serde_json::to_string(value) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOutput {
    pub state: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_deadline: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<NotificationOption>,
}

impl StatusOutput {
    pub fn new(latest: Option<&LogEntry>, now_ms: i64) -> Self {
        let state = latest.map(|e| e.state).unwrap_or_default();
        let notification = NotificationKind::for_state(state);
        Self {
            state,
            since: latest.map(|e| e.timestamp),
            reminder_deadline: latest
                .filter(|e| e.reminder_deadline > 0)
                .map(|e| e.reminder_deadline),
            remaining_ms: latest.and_then(|e| e.remaining_ms(now_ms)),
            notification,
            options: notification
                .map(|k| k.options().to_vec())
                .unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct SessionsOutput<'a> {
    range: Range,
    label: String,
    start_ms: i64,
    end_ms: i64,
    total_ms: i64,
    sessions: &'a [CompletedSession],
    buckets: &'a [Bucket],
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
}
