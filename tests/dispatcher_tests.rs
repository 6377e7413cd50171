use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use eye_refresh::dispatcher::{Dispatcher, RecoveryAction, Triggered};
use eye_refresh::error::Result;
use eye_refresh::state::{Durations, Event, EventLog, LogEntry, LogStore, State, transition};
use eye_refresh::timer::{DetachedTimers, ManualClock, TimerClass, TimerCommand};
use futures::future::join_all;
use tempfile::TempDir;
use tokio::sync::broadcast;

const T0: i64 = 1_700_000_000_000;

struct Harness {
    _dir: TempDir,
    db_path: std::path::PathBuf,
    log: EventLog,
    clock: Arc<ManualClock>,
    timers: Arc<DetachedTimers>,
    dispatcher: Dispatcher,
}

fn durations() -> Durations {
    Durations::from_secs(1200, 60, 20)
}

/// Every entry must follow from the one committed before it.
fn assert_log_follows_machine(newest_first: Vec<LogEntry>) {
    let ordered: Vec<_> = newest_first.into_iter().rev().collect();
    for pair in ordered.windows(2) {
        let event = pair[1].causing_event.unwrap();
        let expected = transition(pair[0].state, event, pair[1].timestamp, &durations());
        assert_eq!(
            pair[1].state, expected.next,
            "{} --{}--> {} is not a valid transition",
            pair[0].state, event, pair[1].state
        );
    }
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("events.db");
    let log = EventLog::open(&db_path).unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let timers = Arc::new(DetachedTimers::new());
    let dispatcher = Dispatcher::new(
        Arc::new(log.clone()),
        timers.clone(),
        clock.clone(),
        durations(),
    );
    Harness {
        _dir: dir,
        db_path,
        log,
        clock,
        timers,
        dispatcher,
    }
}

#[tokio::test]
async fn test_cold_start_schedules_first_reminder() {
    let h = harness();

    let outcome = h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();

    assert_eq!(outcome.previous, State::Paused);
    assert_eq!(outcome.state(), State::ReminderScheduled);
    assert_eq!(outcome.entry.timestamp, T0);
    assert_eq!(outcome.entry.reminder_deadline, T0 + 1_200_000);
    assert_eq!(
        h.timers.issued(),
        vec![TimerCommand::Arm {
            class: TimerClass::Reminder,
            at_ms: T0 + 1_200_000
        }]
    );
}

#[tokio::test]
async fn test_happy_path_cycle() {
    let h = harness();

    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    h.clock.advance(1_200_000);
    h.dispatcher.dispatch(Event::ReminderDue).await.unwrap();
    h.clock.advance(5_000);
    h.dispatcher.dispatch(Event::RefreshStarted).await.unwrap();
    h.clock.advance(20_000);
    h.dispatcher.dispatch(Event::RefreshTimeUp).await.unwrap();
    h.clock.advance(3_000);
    let last = h.dispatcher.dispatch(Event::RefreshCompleted).await.unwrap();

    assert_eq!(last.state(), State::ReminderScheduled);
    assert_eq!(last.entry.timestamp, T0 + 1_228_000);
    assert_eq!(last.entry.reminder_deadline, T0 + 1_228_000 + 1_200_000);

    let states: Vec<State> = h
        .log
        .latest_n(10)
        .await
        .unwrap()
        .into_iter()
        .rev()
        .map(|e| e.state)
        .collect();
    assert_eq!(
        states,
        vec![
            State::ReminderScheduled,
            State::ReminderSent,
            State::RefreshHappening,
            State::RefreshTimeUp,
            State::ReminderScheduled,
        ]
    );
}

#[tokio::test]
async fn test_snooze_uses_snooze_duration() {
    let h = harness();
    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    h.clock.advance(1_200_000);
    h.dispatcher.dispatch(Event::ReminderDue).await.unwrap();
    h.clock.advance(2_000);

    let outcome = h.dispatcher.dispatch(Event::SnoozeRequested).await.unwrap();

    assert_eq!(outcome.state(), State::ReminderScheduled);
    assert_eq!(outcome.entry.reminder_deadline, T0 + 1_202_000 + 60_000);
}

#[tokio::test]
async fn test_stale_delivery_is_recorded_without_change() {
    let h = harness();
    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    h.dispatcher.dispatch(Event::SchedulingPaused).await.unwrap();
    let issued_before = h.timers.issued().len();

    let outcome = h.dispatcher.dispatch(Event::ReminderDue).await.unwrap();

    assert!(!outcome.handled);
    assert!(!outcome.changed());
    assert_eq!(outcome.state(), State::Paused);
    assert!(outcome.commands.is_empty());
    assert_eq!(h.timers.issued().len(), issued_before);
    assert_eq!(h.log.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let h = harness();
    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    h.clock.advance(1_200_000);
    h.dispatcher.dispatch(Event::ReminderDue).await.unwrap();
    drop(h.dispatcher);
    drop(h.log);

    let log = EventLog::open(&h.db_path).unwrap();
    let timers = Arc::new(DetachedTimers::new());
    let dispatcher = Dispatcher::new(Arc::new(log.clone()), timers.clone(), h.clock.clone(), durations());

    assert_eq!(dispatcher.current_state().await.unwrap(), State::ReminderSent);

    let action = dispatcher.reconcile("startup").await.unwrap();
    let RecoveryAction::AwaitingUser { entry } = action else {
        panic!("expected to wait on the user, got {action:?}");
    };
    assert_eq!(entry.state, State::ReminderSent);
    assert_eq!(log.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_recovery_after_long_offline_gap() {
    let h = harness();
    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    h.clock.advance(3 * 3_600_000);

    let action = h.dispatcher.reconcile("startup").await.unwrap();

    let RecoveryAction::CaughtUp { outcome } = action else {
        panic!("expected catch-up, got {action:?}");
    };
    assert_eq!(outcome.state(), State::ReminderSent);
    assert_eq!(outcome.entry.causing_event, Some(Event::ReminderDue));
}

#[tokio::test]
async fn test_open_app_reconciles_instead_of_logging() {
    let h = harness();
    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();

    let triggered = h.dispatcher.trigger(Event::OpenApp).await.unwrap();

    assert_eq!(
        triggered,
        Triggered::Recovered(RecoveryAction::Rearmed {
            class: TimerClass::Reminder,
            at_ms: T0 + 1_200_000,
        })
    );
    assert_eq!(h.log.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_dispatches_serialize() {
    let h = harness();
    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();

    // Clock does not move, so every entry needs its own bumped timestamp.
    let results = join_all((0..8).map(|i| {
        let event = if i % 2 == 0 {
            Event::SchedulingPaused
        } else {
            Event::SchedulingTurnedOn
        };
        h.dispatcher.dispatch(event)
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    let entries = h.log.latest_n(100).await.unwrap();
    assert_eq!(entries.len(), 9);

    let mut timestamps: Vec<i64> = entries.iter().map(|e| e.timestamp).collect();
    timestamps.sort_unstable();
    timestamps.dedup();
    assert_eq!(timestamps.len(), 9);
    assert_eq!(timestamps[0], T0);
    assert_eq!(timestamps[8], T0 + 8);

    assert_log_follows_machine(entries);
}

/// Log handle of a second process on the same file. Before its first append
/// lands, the other process commits an event of its own.
struct RacedByOther {
    log: EventLog,
    other: Arc<Dispatcher>,
    other_event: Event,
    raced: AtomicBool,
}

#[async_trait]
impl LogStore for RacedByOther {
    async fn append_after(&self, entry: LogEntry, expected_prev: Option<i64>) -> Result<LogEntry> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.other.dispatch(self.other_event).await?;
        }
        self.log.append_after(entry, expected_prev).await
    }

    async fn latest(&self) -> Result<Option<LogEntry>> {
        self.log.latest().await
    }

    async fn latest_n(&self, n: usize) -> Result<Vec<LogEntry>> {
        self.log.latest_n(n).await
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }
}

#[tokio::test]
async fn test_stale_write_from_second_process_is_reevaluated() {
    let h = harness();
    let daemon = Arc::new(h.dispatcher);
    daemon.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    h.clock.advance(1_200_000);
    daemon.dispatch(Event::ReminderDue).await.unwrap();

    // `send snooze` reads ReminderSent; the daemon starts the refresh before
    // the snooze is written.
    let cli = Dispatcher::new(
        Arc::new(RacedByOther {
            log: EventLog::open(&h.db_path).unwrap(),
            other: daemon.clone(),
            other_event: Event::RefreshStarted,
            raced: AtomicBool::new(false),
        }),
        Arc::new(DetachedTimers::new()),
        h.clock.clone(),
        durations(),
    );
    h.clock.advance(1_000);

    let outcome = cli.dispatch(Event::SnoozeRequested).await.unwrap();

    assert_eq!(outcome.previous, State::RefreshHappening);
    assert!(!outcome.handled);
    assert_eq!(outcome.state(), State::RefreshHappening);
    assert!(outcome.commands.is_empty());

    let entries = h.log.latest_n(10).await.unwrap();
    let states: Vec<State> = entries.iter().rev().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            State::ReminderScheduled,
            State::ReminderSent,
            State::RefreshHappening,
            State::RefreshHappening,
        ]
    );
    assert_log_follows_machine(entries);
}

#[tokio::test]
async fn test_two_processes_on_one_file_keep_log_consistent() {
    let h = harness();
    h.dispatcher.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    let other = Dispatcher::new(
        Arc::new(EventLog::open(&h.db_path).unwrap()),
        Arc::new(DetachedTimers::new()),
        h.clock.clone(),
        durations(),
    );

    let toggle = |i: usize| {
        if i % 2 == 0 {
            Event::SchedulingPaused
        } else {
            Event::SchedulingTurnedOn
        }
    };
    let ours = join_all((0..8).map(|i| h.dispatcher.dispatch(toggle(i))));
    let theirs = join_all((0..8).map(|i| other.dispatch(toggle(i + 1))));
    let (ours, theirs) = tokio::join!(ours, theirs);

    let mut committed = 1;
    for result in ours.into_iter().chain(theirs) {
        match result {
            Ok(_) => committed += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected failure: {e}"),
        }
    }

    let entries = h.log.latest_n(100).await.unwrap();
    assert_eq!(entries.len(), committed);
    assert_log_follows_machine(entries);
}
