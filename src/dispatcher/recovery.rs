//! Re-derives alarms from the latest log entry.
//!
//! Alarms do not survive a process exit, so on startup, on every health-check
//! tick and whenever the UI is opened the daemon reconciles: expired deadlines
//! are caught up by dispatching their event now, future ones are re-armed.

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::state::{Event, LogEntry, State};
use crate::timer::TimerClass;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Paused or empty log. Both alarms cancelled.
    Idle,
    Rearmed { class: TimerClass, at_ms: i64 },
    /// The deadline passed while nobody was listening.
    CaughtUp { outcome: DispatchOutcome },
    /// Nothing to arm until the user answers the pending notification.
    AwaitingUser { entry: LogEntry },
}

/// Result of [`Dispatcher::trigger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Triggered {
    Dispatched(DispatchOutcome),
    Recovered(RecoveryAction),
}

impl Dispatcher {
    /// Entry point for UI actions. `OpenApp` never reaches the machine.
    pub async fn trigger(&self, event: Event) -> Result<Triggered> {
        if event == Event::OpenApp {
            return self.reconcile("open_app").await.map(Triggered::Recovered);
        }
        self.dispatch(event).await.map(Triggered::Dispatched)
    }

    pub async fn reconcile(&self, reason: &str) -> Result<RecoveryAction> {
        let _guard = self.lock.lock().await;

        let Some(entry) = self.log.latest().await? else {
            debug!(reason, "Empty log, nothing to recover");
            self.cancel_all().await;
            return Ok(RecoveryAction::Idle);
        };

        let now = self.clock.now_ms();
        let action = match entry.state {
            State::Paused => {
                self.cancel_all().await;
                RecoveryAction::Idle
            }
            State::ReminderScheduled => {
                self.resume(TimerClass::Reminder, entry.reminder_deadline, now)
                    .await?
            }
            State::RefreshHappening => {
                let deadline = entry.timestamp.saturating_add(self.durations.refresh_ms);
                self.resume(TimerClass::Refresh, deadline, now).await?
            }
            State::ReminderSent | State::RefreshTimeUp => {
                RecoveryAction::AwaitingUser { entry }
            }
        };

        info!(reason, ?action, "Recovery complete");
        Ok(action)
    }

    async fn resume(&self, class: TimerClass, deadline: i64, now: i64) -> Result<RecoveryAction> {
        if deadline <= now {
            let event = Event::from_timer(class);
            info!(%class, deadline, now, %event, "Deadline passed while offline, catching up");
            let outcome = self.process(event).await?;
            return Ok(RecoveryAction::CaughtUp { outcome });
        }

        if self.timers.armed(class) == Some(deadline) {
            trace!(%class, deadline, "Alarm already pending");
        } else {
            self.timers.arm(class, deadline).await?;
            debug!(%class, deadline, remaining_ms = deadline - now, "Alarm re-armed");
        }
        Ok(RecoveryAction::Rearmed {
            class,
            at_ms: deadline,
        })
    }

    async fn cancel_all(&self) {
        for class in TimerClass::ALL {
            if let Err(e) = self.timers.cancel(class).await {
                warn!(error = %e, %class, "Cancel during recovery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;
    use crate::state::{Durations, EventLog};
    use crate::timer::{DetachedTimers, ManualClock, TimerCommand, TokioTimers, WakeScheduler};

    const T0: i64 = 1_700_000_000_000;

    struct Harness {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        timers: Arc<DetachedTimers>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let log = EventLog::open(dir.path().join("events.db")).unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let timers = Arc::new(DetachedTimers::new());
        let dispatcher = Dispatcher::new(
            Arc::new(log),
            timers.clone(),
            clock.clone(),
            Durations::from_secs(1200, 60, 20),
        );
        Harness {
            _dir: dir,
            clock,
            timers,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_empty_log_is_idle() {
        let h = harness();

        let action = h.dispatcher.reconcile("startup").await.unwrap();

        assert_eq!(action, RecoveryAction::Idle);
        assert_eq!(
            h.timers.issued(),
            vec![
                TimerCommand::Cancel(TimerClass::Reminder),
                TimerCommand::Cancel(TimerClass::Refresh),
            ]
        );
    }

    #[tokio::test]
    async fn test_future_reminder_is_rearmed() {
        let h = harness();
        h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
        h.clock.advance(600_000);

        let action = h.dispatcher.reconcile("startup").await.unwrap();

        assert_eq!(
            action,
            RecoveryAction::Rearmed {
                class: TimerClass::Reminder,
                at_ms: T0 + 1_200_000
            }
        );
        assert_eq!(
            h.dispatcher.current_state().await.unwrap(),
            State::ReminderScheduled
        );
    }

    #[tokio::test]
    async fn test_expired_reminder_is_caught_up() {
        let h = harness();
        h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
        h.clock.advance(1_500_000);

        let action = h.dispatcher.reconcile("health_check").await.unwrap();

        let RecoveryAction::CaughtUp { outcome } = action else {
            panic!("expected catch-up, got {action:?}");
        };
        assert_eq!(outcome.previous, State::ReminderScheduled);
        assert_eq!(outcome.state(), State::ReminderSent);
        assert_eq!(outcome.entry.causing_event, Some(Event::ReminderDue));
    }

    #[tokio::test]
    async fn test_refresh_in_progress_uses_remaining_time() {
        let h = harness();
        h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
        h.dispatcher.dispatch(Event::ReminderDue).await.unwrap();
        let started = h.dispatcher.dispatch(Event::RefreshStarted).await.unwrap();
        h.clock.advance(5_000);

        let action = h.dispatcher.reconcile("startup").await.unwrap();

        assert_eq!(
            action,
            RecoveryAction::Rearmed {
                class: TimerClass::Refresh,
                at_ms: started.entry.timestamp + 20_000
            }
        );
    }

    #[tokio::test]
    async fn test_expired_refresh_is_caught_up() {
        let h = harness();
        h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
        h.dispatcher.dispatch(Event::ReminderDue).await.unwrap();
        h.dispatcher.dispatch(Event::RefreshStarted).await.unwrap();
        h.clock.advance(60_000);

        let action = h.dispatcher.reconcile("startup").await.unwrap();

        match action {
            RecoveryAction::CaughtUp { outcome } => {
                assert_eq!(outcome.state(), State::RefreshTimeUp);
            }
            other => panic!("expected catch-up, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_waiting_states_arm_nothing() {
        let h = harness();
        h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
        h.dispatcher.dispatch(Event::ReminderDue).await.unwrap();
        let issued_before = h.timers.issued().len();

        let action = h.dispatcher.reconcile("startup").await.unwrap();

        match action {
            RecoveryAction::AwaitingUser { entry } => {
                assert_eq!(entry.state, State::ReminderSent);
            }
            other => panic!("expected awaiting user, got {other:?}"),
        }
        assert_eq!(h.timers.issued().len(), issued_before);
    }

    #[tokio::test]
    async fn test_open_app_is_not_logged() {
        let h = harness();
        h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
        let before = h.dispatcher.latest().await.unwrap();

        let triggered = h.dispatcher.trigger(Event::OpenApp).await.unwrap();

        assert!(matches!(
            triggered,
            Triggered::Recovered(RecoveryAction::Rearmed { .. })
        ));
        assert_eq!(h.dispatcher.latest().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_trigger_dispatches_other_events() {
        let h = harness();

        let triggered = h.dispatcher.trigger(Event::SchedulingTurnedOn).await.unwrap();

        match triggered {
            Triggered::Dispatched(outcome) => {
                assert_eq!(outcome.state(), State::ReminderScheduled);
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    /// Real timers that count how often anything was armed.
    struct CountingTimers {
        inner: TokioTimers,
        arms: AtomicUsize,
    }

    #[async_trait]
    impl WakeScheduler for CountingTimers {
        async fn arm(&self, class: TimerClass, at_ms: i64) -> Result<()> {
            self.arms.fetch_add(1, Ordering::SeqCst);
            self.inner.arm(class, at_ms).await
        }

        async fn cancel(&self, class: TimerClass) -> Result<()> {
            self.inner.cancel(class).await
        }

        fn armed(&self, class: TimerClass) -> Option<i64> {
            self.inner.armed(class)
        }
    }

    #[tokio::test]
    async fn test_pending_alarm_not_rearmed_each_tick() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let (inner, _deliveries): (TokioTimers, mpsc::Receiver<Event>) =
            TokioTimers::new(clock.clone());
        let timers = Arc::new(CountingTimers {
            inner,
            arms: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(
            Arc::new(EventLog::open(dir.path().join("events.db")).unwrap()),
            timers.clone(),
            clock.clone(),
            Durations::from_secs(1200, 60, 20),
        );

        dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
        assert_eq!(timers.arms.load(Ordering::SeqCst), 1);

        for _ in 0..3 {
            clock.advance(60_000);
            let action = dispatcher.reconcile("health_check").await.unwrap();
            assert_eq!(
                action,
                RecoveryAction::Rearmed {
                    class: TimerClass::Reminder,
                    at_ms: T0 + 1_200_000
                }
            );
        }
        assert_eq!(timers.arms.load(Ordering::SeqCst), 1);

        // A lost alarm is armed again.
        timers.cancel(TimerClass::Reminder).await.unwrap();
        dispatcher.reconcile("health_check").await.unwrap();
        assert_eq!(timers.arms.load(Ordering::SeqCst), 2);
        assert_eq!(timers.armed(TimerClass::Reminder), Some(T0 + 1_200_000));
    }
}
