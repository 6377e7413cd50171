use chrono::{Local, TimeZone};
use console::{Style, style};

use crate::dispatcher::{DispatchOutcome, RecoveryAction};
use crate::history::{Bucket, CompletedSession, Range};
use crate::notification::NotificationKind;
use crate::state::{LogEntry, State};

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
        println!();
    }

    pub fn print_status(&self, latest: Option<&LogEntry>, now_ms: i64) {
        let Some(entry) = latest else {
            println!(
                "State: {}  {}",
                self.state_style(State::Paused).apply_to(State::Paused),
                style("(no transitions recorded)").dim()
            );
            return;
        };

        println!(
            "State: {}",
            self.state_style(entry.state).apply_to(entry.state)
        );
        println!(
            "{}",
            style(format!("Since: {}", format_ms(entry.timestamp))).dim()
        );

        if let Some(remaining) = entry.remaining_ms(now_ms) {
            println!(
                "Next reminder: {} (in {})",
                format_ms(entry.reminder_deadline),
                format_duration(remaining)
            );
        }

        if let Some(kind) = NotificationKind::for_state(entry.state) {
            println!();
            println!("{}", style(kind.message()).bold());
            for option in kind.options() {
                println!(
                    "  {} {} {}",
                    style("→").cyan(),
                    option.label,
                    style(format!("(send {})", option.event)).dim()
                );
            }
        }
    }

    pub fn print_outcome(&self, outcome: &DispatchOutcome) {
        let event = outcome
            .entry
            .causing_event
            .map(|e| e.as_str())
            .unwrap_or("-");

        if outcome.handled {
            self.print_success(&format!(
                "{} → {} ({})",
                outcome.previous,
                self.state_style(outcome.state()).apply_to(outcome.state()),
                event
            ));
        } else {
            self.print_info(&format!(
                "{} ignored in {}, recorded without a state change",
                event, outcome.previous
            ));
        }

        for warning in &outcome.warnings {
            self.print_warning(warning);
        }
    }

    pub fn print_recovery(&self, action: &RecoveryAction) {
        match action {
            RecoveryAction::Idle => self.print_info("Paused, no alarms armed"),
            RecoveryAction::Rearmed { class, at_ms } => {
                self.print_info(&format!("{} armed for {}", class, format_ms(*at_ms)))
            }
            RecoveryAction::CaughtUp { outcome } => {
                self.print_warning("Missed a deadline while offline, catching up");
                self.print_outcome(outcome);
            }
            RecoveryAction::AwaitingUser { entry } => {
                self.print_info(&format!("Waiting on you ({})", entry.state))
            }
        }
    }

    pub fn print_history(&self, entries: &[LogEntry]) {
        if entries.is_empty() {
            println!("{}", style("No transitions recorded.").dim());
            return;
        }

        println!(
            "{:<21} {:<22} {:<20}",
            style("Time").bold(),
            style("Event").bold(),
            style("State").bold()
        );
        println!("{}", style("─".repeat(65)).dim());

        for entry in entries {
            let event = entry.causing_event.map(|e| e.as_str()).unwrap_or("-");
            println!(
                "{:<21} {:<22} {:<20}",
                format_ms(entry.timestamp),
                event,
                self.state_style(entry.state).apply_to(entry.state.to_string())
            );
        }
    }

    pub fn print_sessions(&self, range: &Range, sessions: &[CompletedSession], buckets: &[Bucket]) {
        self.print_header(&format!("Refresh sessions: {}", range));

        if sessions.is_empty() {
            println!("{}", style("No completed sessions.").dim());
            return;
        }

        let total_ms: i64 = sessions.iter().map(|s| s.duration_ms).sum();
        println!(
            "Completed: {}  Total time: {}",
            style(sessions.len()).green(),
            format_duration(total_ms)
        );
        println!();

        let busiest = buckets.iter().map(|b| b.count).max().unwrap_or(0);
        for bucket in buckets.iter().filter(|b| b.count > 0) {
            println!(
                "  {:<18} {} {}",
                bucket.label,
                self.bar(bucket.count, busiest, 20),
                bucket.count
            );
        }
        println!();

        for session in sessions {
            println!(
                "  {} {}  {}",
                style("✓").green(),
                session.started_at_local().format("%Y-%m-%d %H:%M:%S"),
                style(format_duration(session.duration_ms)).dim()
            );
        }
    }

    pub fn print_success(&self, message: &str) {
        println!("{} {}", style("✓").green().bold(), message);
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), message);
    }

    pub fn print_warning(&self, message: &str) {
        println!("{} {}", style("!").yellow().bold(), message);
    }

    pub fn print_info(&self, message: &str) {
        println!("{} {}", style("→").cyan(), message);
    }

    fn state_style(&self, state: State) -> Style {
        match state {
            State::Paused => Style::new().dim(),
            State::ReminderScheduled => Style::new().blue(),
            State::ReminderSent => Style::new().yellow().bold(),
            State::RefreshHappening => Style::new().cyan().bold(),
            State::RefreshTimeUp => Style::new().green().bold(),
        }
    }

    fn bar(&self, value: usize, max: usize, width: usize) -> String {
        let filled = if max == 0 { 0 } else { value * width / max };
        format!(
            "{}{}",
            style("█".repeat(filled)).green(),
            style("░".repeat(width - filled)).dim()
        )
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

fn format_ms(timestamp_ms: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub(crate) fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{}s", s),
        (0, m, s) => format!("{}m {:02}s", m, s),
        (h, m, _) => format!("{}h {:02}m", h, m),
    }
}
