//! Single entry point for every trigger.
//!
//! Each call runs read-latest → transition → append → apply timers under one
//! async mutex, so concurrent triggers never observe the same current state.
//! Current state is always re-read from the log; nothing is cached here.
//!
//! The mutex only covers this process. The append is a compare-and-set on the
//! entry the transition was computed from, so a write from another process
//! in between makes the append fail and the event is re-evaluated.

mod recovery;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::error::{RefreshError, Result};
use crate::state::{Durations, Event, LogEntry, LogStore, State, transition};
use crate::timer::{Clock, TimerCommand, WakeScheduler};

pub use recovery::{RecoveryAction, Triggered};

/// Reads and re-evaluations per event before a conflict is surfaced.
const MAX_APPEND_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub previous: State,
    pub entry: LogEntry,
    /// False when the event had no transition from `previous`.
    pub handled: bool,
    pub commands: Vec<TimerCommand>,
    /// Timer failures. The entry is committed regardless.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DispatchOutcome {
    pub fn state(&self) -> State {
        self.entry.state
    }

    pub fn changed(&self) -> bool {
        self.previous != self.entry.state
    }
}

pub struct Dispatcher {
    log: Arc<dyn LogStore>,
    timers: Arc<dyn WakeScheduler>,
    clock: Arc<dyn Clock>,
    durations: Durations,
    lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        log: Arc<dyn LogStore>,
        timers: Arc<dyn WakeScheduler>,
        clock: Arc<dyn Clock>,
        durations: Durations,
    ) -> Self {
        Self {
            log,
            timers,
            clock,
            durations,
            lock: Mutex::new(()),
        }
    }

    pub fn durations(&self) -> &Durations {
        &self.durations
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }

    pub async fn latest(&self) -> Result<Option<LogEntry>> {
        self.log.latest().await
    }

    /// `Paused` when the log is empty.
    pub async fn current_state(&self) -> Result<State> {
        Ok(self
            .log
            .latest()
            .await?
            .map(|entry| entry.state)
            .unwrap_or_default())
    }

    /// Runs one machine event. `OpenApp` is rejected here; it goes through
    /// [`Dispatcher::trigger`].
    pub async fn dispatch(&self, event: Event) -> Result<DispatchOutcome> {
        if event == Event::OpenApp {
            return Err(RefreshError::Other(
                "open_app triggers recovery and is not a machine event".into(),
            ));
        }
        let _guard = self.lock.lock().await;
        self.process(event).await
    }

    /// Caller must hold `self.lock`.
    async fn process(&self, event: Event) -> Result<DispatchOutcome> {
        let mut attempt = 1;
        let (previous, t, entry) = loop {
            let latest = self.log.latest().await?;
            let previous = latest.as_ref().map(|e| e.state).unwrap_or_default();
            let now = self.entry_timestamp(latest.as_ref());

            let t = transition(previous, event, now, &self.durations);
            if t.is_noop() {
                debug!(state = %previous, %event, "No transition for event, recording for audit");
            }

            let entry = LogEntry::new(now, t.next, Some(event)).with_deadline(t.reminder_deadline);
            let expected_prev = latest.as_ref().map(|e| e.timestamp);
            match self.log.append_after(entry, expected_prev).await {
                Ok(entry) => break (previous, t, entry),
                Err(e) if e.is_conflict() && attempt < MAX_APPEND_ATTEMPTS => {
                    warn!(error = %e, %event, attempt, "Log changed by another writer, re-evaluating");
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, state = %previous, %event, "Append failed, timers left untouched");
                    return Err(e);
                }
            }
        };

        let warnings = self.apply_commands(&t.commands).await;

        info!(
            from = %previous,
            to = %entry.state,
            %event,
            timestamp = entry.timestamp,
            "Transition committed"
        );

        Ok(DispatchOutcome {
            previous,
            entry,
            handled: t.handled,
            commands: t.commands,
            warnings,
        })
    }

    /// Wall clock, bumped past the latest entry so timestamps stay unique.
    fn entry_timestamp(&self, latest: Option<&LogEntry>) -> i64 {
        let now = self.clock.now_ms();
        match latest {
            Some(entry) if entry.timestamp >= now => entry.timestamp + 1,
            _ => now,
        }
    }

    async fn apply_commands(&self, commands: &[TimerCommand]) -> Vec<String> {
        let mut warnings = Vec::new();
        for command in commands {
            if let Err(e) = self.timers.apply(*command).await {
                warn!(error = %e, ?command, "Timer command failed");
                warnings.push(e.to_string());
            }
        }
        warnings
    }
}
