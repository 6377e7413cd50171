pub mod cli;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod notification;
pub mod output;
pub mod state;
pub mod timer;

pub use config::{AppPaths, RefreshConfig};
pub use daemon::Daemon;
pub use dispatcher::{DispatchOutcome, Dispatcher, RecoveryAction, Triggered};
pub use error::{RefreshError, Result};
pub use notification::{NotificationKind, Notifier};
pub use state::{Durations, Event, EventLog, LogEntry, LogStore, State};
pub use timer::{Clock, SystemClock, TimerClass, TimerCommand, TokioTimers, WakeScheduler};
