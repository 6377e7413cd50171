use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::TimingConfig;
use crate::error::RefreshError;
use crate::timer::{TimerClass, TimerCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Paused,
    ReminderScheduled,
    /// Reminder fired; waiting for the user to start, snooze or pause.
    ReminderSent,
    RefreshHappening,
    /// Refresh interval elapsed; waiting for the user to acknowledge it.
    RefreshTimeUp,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Paused,
        State::ReminderScheduled,
        State::ReminderSent,
        State::RefreshHappening,
        State::RefreshTimeUp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::ReminderScheduled => "reminder_scheduled",
            Self::ReminderSent => "reminder_sent",
            Self::RefreshHappening => "refresh_happening",
            Self::RefreshTimeUp => "refresh_time_up",
        }
    }

    /// The alarm this state is waiting on, if any.
    pub fn timer_class(&self) -> Option<TimerClass> {
        match self {
            Self::ReminderScheduled => Some(TimerClass::Reminder),
            Self::RefreshHappening => Some(TimerClass::Refresh),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Paused)
    }

    pub fn awaits_user(&self) -> bool {
        matches!(self, Self::ReminderSent | Self::RefreshTimeUp)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Paused => "Paused",
            Self::ReminderScheduled => "ReminderScheduled",
            Self::ReminderSent => "ReminderSent",
            Self::RefreshHappening => "RefreshHappening",
            Self::RefreshTimeUp => "RefreshTimeUp",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for State {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| RefreshError::unknown("state", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    SchedulingTurnedOn,
    SchedulingPaused,
    ReminderDue,
    SnoozeRequested,
    RefreshStarted,
    RefreshTimeUp,
    RefreshCompleted,
    RefreshCancelled,
    /// UI came to the foreground. Never fed to the machine.
    OpenApp,
}

impl Event {
    pub const ALL: [Event; 9] = [
        Event::SchedulingTurnedOn,
        Event::SchedulingPaused,
        Event::ReminderDue,
        Event::SnoozeRequested,
        Event::RefreshStarted,
        Event::RefreshTimeUp,
        Event::RefreshCompleted,
        Event::RefreshCancelled,
        Event::OpenApp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchedulingTurnedOn => "scheduling_turned_on",
            Self::SchedulingPaused => "scheduling_paused",
            Self::ReminderDue => "reminder_due",
            Self::SnoozeRequested => "snooze_requested",
            Self::RefreshStarted => "refresh_started",
            Self::RefreshTimeUp => "refresh_time_up",
            Self::RefreshCompleted => "refresh_completed",
            Self::RefreshCancelled => "refresh_cancelled",
            Self::OpenApp => "open_app",
        }
    }

    /// The event an elapsed alarm delivers.
    pub fn from_timer(class: TimerClass) -> Self {
        match class {
            TimerClass::Reminder => Self::ReminderDue,
            TimerClass::Refresh => Self::RefreshTimeUp,
        }
    }

    pub fn is_timer_delivered(&self) -> bool {
        matches!(self, Self::ReminderDue | Self::RefreshTimeUp)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Event {
    type Err = RefreshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| RefreshError::unknown("event", s))
    }
}

/// Durations the machine schedules with, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Durations {
    pub reminder_interval_ms: i64,
    pub snooze_ms: i64,
    pub refresh_ms: i64,
}

impl Durations {
    pub fn from_secs(reminder_interval: u64, snooze: u64, refresh: u64) -> Self {
        Self {
            reminder_interval_ms: secs_to_ms(reminder_interval),
            snooze_ms: secs_to_ms(snooze),
            refresh_ms: secs_to_ms(refresh),
        }
    }
}

impl Default for Durations {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for Durations {
    fn from(timing: &TimingConfig) -> Self {
        Self::from_secs(
            timing.reminder_interval_secs,
            timing.snooze_secs,
            timing.refresh_secs,
        )
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 1000).saturating_mul(1000)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: State,
    pub commands: Vec<TimerCommand>,
    /// Armed reminder timestamp when `next` is `ReminderScheduled`, else 0.
    pub reminder_deadline: i64,
    /// False when the (state, event) pair has no table entry.
    pub handled: bool,
}

impl Transition {
    fn unchanged(current: State) -> Self {
        Self {
            next: current,
            commands: Vec::new(),
            reminder_deadline: 0,
            handled: false,
        }
    }

    fn to(next: State, commands: Vec<TimerCommand>) -> Self {
        let reminder_deadline = if next == State::ReminderScheduled {
            commands
                .iter()
                .find_map(|cmd| match cmd {
                    TimerCommand::Arm {
                        class: TimerClass::Reminder,
                        at_ms,
                    } => Some(*at_ms),
                    _ => None,
                })
                .unwrap_or(0)
        } else {
            0
        };

        Self {
            next,
            commands,
            reminder_deadline,
            handled: true,
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.handled
    }
}

/// Pure transition function. Unlisted pairs leave the state and timers alone.
pub fn transition(current: State, event: Event, now_ms: i64, durations: &Durations) -> Transition {
    use Event as E;
    use State as S;
    use TimerCommand as Cmd;

    let arm = |class, delay_ms: i64| Cmd::Arm {
        class,
        at_ms: now_ms.saturating_add(delay_ms),
    };

    match (current, event) {
        (S::Paused, E::SchedulingTurnedOn) => Transition::to(
            S::ReminderScheduled,
            vec![arm(TimerClass::Reminder, durations.reminder_interval_ms)],
        ),
        (S::ReminderScheduled, E::SchedulingPaused) => {
            Transition::to(S::Paused, vec![Cmd::Cancel(TimerClass::Reminder)])
        }
        (S::ReminderScheduled, E::ReminderDue) => Transition::to(S::ReminderSent, Vec::new()),
        (S::ReminderSent, E::SnoozeRequested) => Transition::to(
            S::ReminderScheduled,
            vec![arm(TimerClass::Reminder, durations.snooze_ms)],
        ),
        (S::ReminderSent, E::SchedulingPaused) => {
            Transition::to(S::Paused, vec![Cmd::Cancel(TimerClass::Reminder)])
        }
        (S::ReminderSent, E::RefreshStarted) => Transition::to(
            S::RefreshHappening,
            vec![arm(TimerClass::Refresh, durations.refresh_ms)],
        ),
        (S::RefreshHappening, E::RefreshTimeUp) => Transition::to(S::RefreshTimeUp, Vec::new()),
        (S::RefreshTimeUp, E::RefreshCompleted) => Transition::to(
            S::ReminderScheduled,
            vec![arm(TimerClass::Reminder, durations.reminder_interval_ms)],
        ),
        (S::RefreshTimeUp, E::RefreshCancelled) => Transition::to(
            S::ReminderScheduled,
            vec![
                Cmd::Cancel(TimerClass::Refresh),
                arm(TimerClass::Reminder, durations.snooze_ms),
            ],
        ),
        _ => Transition::unchanged(current),
    }
}
