use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::history::RangeKind;
use crate::state::Event;

#[derive(Parser)]
#[command(name = "eye-refresh")]
#[command(author, version, about = "Eye rest reminders driven by a durable state machine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Data directory (default: ~/.eye-refresh)
    #[arg(long, global = true, env = "EYE_REFRESH_DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Output format for CLI results.
/// - Text: Human-readable text output (default)
/// - Json: Single JSON object per command
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory, default config and event log
    Init,

    /// Run the reminder daemon in the foreground
    ///
    /// Reads actions from stdin, one per line: start, snooze, pause, resume,
    /// done, cancel, open, status.
    Run {
        /// Turn scheduling on at startup if currently paused
        #[arg(long)]
        start: bool,
    },

    /// Record a single event and exit
    Send {
        #[arg(value_enum)]
        event: EventArg,
    },

    /// Show the current state
    Status,

    /// Show recent transitions, newest first
    History {
        /// Number of entries (default: state.history_limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show completed refresh sessions
    Sessions {
        #[arg(short, long, value_enum, default_value = "day")]
        range: RangeArg,

        /// How many ranges back from the current one
        #[arg(long, default_value = "0")]
        ago: u32,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to defaults
    Reset,
}

/// User-facing event names. Timer events are accepted too so a stuck
/// state can be pushed along by hand.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EventArg {
    /// Turn scheduling on
    Resume,
    /// Turn scheduling off
    Pause,
    Start,
    Snooze,
    Done,
    Cancel,
    Open,
    ReminderDue,
    RefreshTimeUp,
}

impl From<EventArg> for Event {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Resume => Self::SchedulingTurnedOn,
            EventArg::Pause => Self::SchedulingPaused,
            EventArg::Start => Self::RefreshStarted,
            EventArg::Snooze => Self::SnoozeRequested,
            EventArg::Done => Self::RefreshCompleted,
            EventArg::Cancel => Self::RefreshCancelled,
            EventArg::Open => Self::OpenApp,
            EventArg::ReminderDue => Self::ReminderDue,
            EventArg::RefreshTimeUp => Self::RefreshTimeUp,
        }
    }
}

impl EventArg {
    /// Parses a daemon stdin action: the short names above or any event name.
    pub fn parse_action(input: &str) -> Option<Event> {
        let input = input.trim();
        <Self as ValueEnum>::from_str(input, true)
            .map(Event::from)
            .ok()
            .or_else(|| input.parse().ok())
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum RangeArg {
    Day,
    Week,
    Month,
    Year,
}

impl From<RangeArg> for RangeKind {
    fn from(arg: RangeArg) -> Self {
        match arg {
            RangeArg::Day => Self::Day,
            RangeArg::Week => Self::Week,
            RangeArg::Month => Self::Month,
            RangeArg::Year => Self::Year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_actions() {
        assert_eq!(EventArg::parse_action("start"), Some(Event::RefreshStarted));
        assert_eq!(EventArg::parse_action(" Snooze \n"), Some(Event::SnoozeRequested));
        assert_eq!(EventArg::parse_action("open"), Some(Event::OpenApp));
        assert_eq!(EventArg::parse_action("reminder-due"), Some(Event::ReminderDue));
    }

    #[test]
    fn test_parse_full_event_names() {
        assert_eq!(
            EventArg::parse_action("scheduling_turned_on"),
            Some(Event::SchedulingTurnedOn)
        );
        assert_eq!(
            EventArg::parse_action("refresh_cancelled"),
            Some(Event::RefreshCancelled)
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(EventArg::parse_action("later"), None);
        assert_eq!(EventArg::parse_action(""), None);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["eye-refresh", "--output", "json", "send", "snooze"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Send {
                event: EventArg::Snooze
            }
        ));
    }
}
