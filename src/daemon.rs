//! Long-running process: feeds alarm deliveries into the dispatcher and
//! periodically re-derives alarms from the log.
//!
//! `eye-refresh send` commits from another process and cannot arm this
//! process's alarms, so the daemon also polls the log head and reconciles as
//! soon as it moves without a local commit to account for it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dispatcher::{Dispatcher, RecoveryAction};
use crate::error::Result;
use crate::notification::Notifier;
use crate::state::{Event, LogEntry};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Daemon {
    dispatcher: Arc<Dispatcher>,
    deliveries: mpsc::Receiver<Event>,
    /// Commits made through this process's log handle.
    local_commits: broadcast::Receiver<LogEntry>,
    /// Newest log timestamp this process committed or reconciled against.
    last_seen: Option<i64>,
    health_check: Duration,
    poll_interval: Duration,
    notifier: Option<Notifier>,
}

impl Daemon {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        deliveries: mpsc::Receiver<Event>,
        health_check: Duration,
    ) -> Self {
        let local_commits = dispatcher.subscribe();
        Self {
            dispatcher,
            deliveries,
            local_commits,
            last_seen: None,
            health_check,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notifier: None,
        }
    }

    /// How often the log head is checked for commits from other processes.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Re-announces a pending prompt at startup, since the popup that was
    /// showing did not survive the restart.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Startup reconcile. Call once before [`Daemon::run`].
    pub async fn recover(&mut self) -> Result<RecoveryAction> {
        self.last_seen = self.dispatcher.latest().await?.map(|e| e.timestamp);
        let action = self.dispatcher.reconcile("startup").await?;
        if let (Some(notifier), RecoveryAction::AwaitingUser { entry }) = (&self.notifier, &action) {
            notifier.notify(entry).await;
        }
        Ok(action)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.health_check);
        ticker.tick().await;
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        info!(
            health_check_secs = self.health_check.as_secs(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Daemon running"
        );

        loop {
            tokio::select! {
                delivered = self.deliveries.recv() => {
                    let Some(event) = delivered else {
                        warn!("Alarm delivery channel closed");
                        break;
                    };
                    match self.dispatcher.dispatch(event).await {
                        Ok(outcome) if !outcome.handled => {
                            debug!(%event, state = %outcome.previous, "Stale alarm delivery");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, %event, "Alarm delivery not recorded"),
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatcher.reconcile("health_check").await {
                        warn!(error = %e, "Health check failed");
                    }
                }
                _ = poll.tick() => self.follow_log().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Daemon shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// Reconciles when the log head is not the newest entry this process
    /// committed or already reconciled against.
    async fn follow_log(&mut self) {
        loop {
            match self.local_commits.try_recv() {
                Ok(entry) => self.last_seen = self.last_seen.max(Some(entry.timestamp)),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Local commit feed lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        let head = match self.dispatcher.latest().await {
            Ok(latest) => latest.map(|e| e.timestamp),
            Err(e) => {
                warn!(error = %e, "Could not read log head");
                return;
            }
        };
        if head == self.last_seen {
            return;
        }

        info!(?head, last_seen = ?self.last_seen, "Log changed outside this process");
        match self.dispatcher.reconcile("external_change").await {
            Ok(action) => debug!(?action, "Reconciled after external change"),
            Err(e) => warn!(error = %e, "Reconcile after external change failed"),
        }
        self.last_seen = head;
    }
}
