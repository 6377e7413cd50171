//! Refresh state machine and its durable transition log.

mod entry;
mod event_log;
mod machine;
mod writer;

use crate::error::RefreshError;

fn persistence_err(msg: impl std::fmt::Display) -> RefreshError {
    RefreshError::Persistence(msg.to_string())
}

fn persistence_err_with<E: std::fmt::Display>(context: &str, err: E) -> RefreshError {
    RefreshError::Persistence(format!("{}: {}", context, err))
}

pub use entry::LogEntry;
pub use event_log::{EventLog, LogStore};
pub use machine::{Durations, Event, State, Transition, transition};
