use std::sync::Arc;
use std::time::Duration;

use eye_refresh::daemon::Daemon;
use eye_refresh::dispatcher::{Dispatcher, RecoveryAction};
use eye_refresh::state::{Durations, Event, EventLog, State};
use eye_refresh::timer::{Clock, DetachedTimers, SystemClock, TokioTimers};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::timeout;

fn durations() -> Durations {
    Durations {
        reminder_interval_ms: 1_200_000,
        snooze_ms: 60_000,
        refresh_ms: 300,
    }
}

#[tokio::test]
async fn test_daemon_follows_send_from_another_process() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("events.db");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let daemon_log = EventLog::open(&db_path).unwrap();
    let mut committed = daemon_log.subscribe();
    let (timers, deliveries) = TokioTimers::new(clock.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(daemon_log.clone()),
        Arc::new(timers),
        clock.clone(),
        durations(),
    ));
    // Health check far away: only log polling can pick up the send.
    let mut daemon = Daemon::new(dispatcher, deliveries, Duration::from_secs(3_600))
        .with_poll_interval(Duration::from_millis(50));
    assert_eq!(daemon.recover().await.unwrap(), RecoveryAction::Idle);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(daemon.run(shutdown_rx));

    // `eye-refresh send` opens its own handle and cannot arm alarms.
    let cli = Dispatcher::new(
        Arc::new(EventLog::open(&db_path).unwrap()),
        Arc::new(DetachedTimers::new()),
        clock,
        durations(),
    );
    cli.dispatch(Event::SchedulingTurnedOn).await.unwrap();
    cli.dispatch(Event::ReminderDue).await.unwrap();
    let started = cli.dispatch(Event::RefreshStarted).await.unwrap();

    let time_up = timeout(Duration::from_secs(5), committed.recv())
        .await
        .expect("refresh alarm never fired")
        .unwrap();

    assert_eq!(time_up.state, State::RefreshTimeUp);
    assert_eq!(time_up.causing_event, Some(Event::RefreshTimeUp));
    assert!(time_up.timestamp >= started.entry.timestamp + 300);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(daemon_log.count().await.unwrap(), 4);
}
