use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Clock, TimerClass, TimerCommand, WakeScheduler};
use crate::error::{RefreshError, Result};
use crate::state::Event;

const DELIVERY_CHANNEL_CAPACITY: usize = 32;

struct Slot {
    generation: u64,
    at_ms: i64,
    handle: JoinHandle<()>,
}

/// In-process scheduler. Each class owns at most one slot; a fired timer
/// sends its event on the delivery channel returned by [`TokioTimers::new`].
pub struct TokioTimers {
    clock: Arc<dyn Clock>,
    deliveries: mpsc::Sender<Event>,
    slots: Arc<Mutex<HashMap<TimerClass, Slot>>>,
    next_generation: AtomicU64,
}

impl TokioTimers {
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<Event>) {
        let (deliveries, rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let timers = Self {
            clock,
            deliveries,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        };
        (timers, rx)
    }

    fn arm_slot(&self, class: TimerClass, at_ms: i64) -> Result<()> {
        if self.deliveries.is_closed() {
            return Err(RefreshError::timer(class, "delivery channel closed"));
        }
        let runtime = Handle::try_current().map_err(|e| RefreshError::timer(class, e))?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay_ms = at_ms.saturating_sub(self.clock.now_ms()).max(0);
        let delay = Duration::from_millis(delay_ms.unsigned_abs());

        let slots = Arc::clone(&self.slots);
        let tx = self.deliveries.clone();

        // Hold the lock across spawn so a zero-delay task cannot look for its
        // slot before it is inserted.
        let mut guard = self.slots.lock();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let still_armed = {
                let mut slots = slots.lock();
                match slots.get(&class) {
                    Some(slot) if slot.generation == generation => {
                        slots.remove(&class);
                        true
                    }
                    _ => false,
                }
            };
            if !still_armed {
                return;
            }

            let event = Event::from_timer(class);
            debug!(%class, %event, at_ms, "Timer fired");
            if tx.send(event).await.is_err() {
                warn!(%class, "Timer fired after delivery channel closed");
            }
        });

        let previous = guard.insert(
            class,
            Slot {
                generation,
                at_ms,
                handle,
            },
        );
        drop(guard);

        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(%class, superseded_at = previous.at_ms, at_ms, "Timer superseded");
        } else {
            debug!(%class, at_ms, delay_ms, "Timer armed");
        }

        Ok(())
    }

    fn cancel_slot(&self, class: TimerClass) {
        if let Some(slot) = self.slots.lock().remove(&class) {
            slot.handle.abort();
            debug!(%class, at_ms = slot.at_ms, "Timer cancelled");
        }
    }
}

#[async_trait]
impl WakeScheduler for TokioTimers {
    async fn arm(&self, class: TimerClass, at_ms: i64) -> Result<()> {
        self.arm_slot(class, at_ms)
    }

    async fn cancel(&self, class: TimerClass) -> Result<()> {
        self.cancel_slot(class);
        Ok(())
    }

    fn armed(&self, class: TimerClass) -> Option<i64> {
        self.slots.lock().get(&class).map(|slot| slot.at_ms)
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, slot) in self.slots.lock().drain() {
            slot.handle.abort();
        }
    }
}

/// Scheduler for short-lived processes: commands are recorded and left for
/// the long-running daemon to re-derive from the log.
#[derive(Default)]
pub struct DetachedTimers {
    issued: Mutex<Vec<TimerCommand>>,
}

impl DetachedTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> Vec<TimerCommand> {
        self.issued.lock().clone()
    }
}

#[async_trait]
impl WakeScheduler for DetachedTimers {
    async fn arm(&self, class: TimerClass, at_ms: i64) -> Result<()> {
        info!(%class, at_ms, "Alarm left for the running daemon to arm");
        self.issued.lock().push(TimerCommand::Arm { class, at_ms });
        Ok(())
    }

    async fn cancel(&self, class: TimerClass) -> Result<()> {
        info!(%class, "Alarm left for the running daemon to cancel");
        self.issued.lock().push(TimerCommand::Cancel(class));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualClock;
    use tokio::time::{Instant, timeout};

    fn timers() -> (TokioTimers, mpsc::Receiver<Event>) {
        TokioTimers::new(Arc::new(ManualClock::new(0)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_only_honors_latest() {
        let (timers, mut rx) = timers();
        let start = Instant::now();

        timers.arm(TimerClass::Reminder, 1_000).await.unwrap();
        timers.arm(TimerClass::Reminder, 5_000).await.unwrap();
        assert_eq!(timers.armed(TimerClass::Reminder), Some(5_000));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, Event::ReminderDue);
        assert!(start.elapsed() >= Duration::from_millis(5_000));
        assert_eq!(timers.armed(TimerClass::Reminder), None);

        let extra = timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(extra.is_err(), "superseded timer must never fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_delivery() {
        let (timers, mut rx) = timers();

        timers.arm(TimerClass::Refresh, 1_000).await.unwrap();
        timers.cancel(TimerClass::Refresh).await.unwrap();
        assert_eq!(timers.armed(TimerClass::Refresh), None);

        let delivered = timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(delivered.is_err());
    }

    #[tokio::test]
    async fn test_cancel_unarmed_is_noop() {
        let (timers, _rx) = timers();
        assert!(timers.cancel(TimerClass::Reminder).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_is_delivered_asynchronously() {
        let (timers, mut rx) = timers();

        timers.arm(TimerClass::Reminder, 0).await.unwrap();
        assert!(rx.try_recv().is_err(), "must not fire inline");

        assert_eq!(rx.recv().await, Some(Event::ReminderDue));
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_fires_immediately() {
        let (timers, mut rx) = TokioTimers::new(Arc::new(ManualClock::new(10_000)));

        timers.arm(TimerClass::Refresh, 2_000).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::RefreshTimeUp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_classes_are_independent() {
        let (timers, mut rx) = timers();

        timers.arm(TimerClass::Reminder, 2_000).await.unwrap();
        timers.arm(TimerClass::Refresh, 1_000).await.unwrap();

        assert_eq!(rx.recv().await, Some(Event::RefreshTimeUp));
        assert_eq!(rx.recv().await, Some(Event::ReminderDue));
    }

    #[tokio::test]
    async fn test_closed_channel_is_scheduling_failure() {
        let (timers, rx) = timers();
        drop(rx);

        let err = timers.arm(TimerClass::Reminder, 1_000).await.unwrap_err();
        assert!(err.is_timer());
    }

    #[tokio::test]
    async fn test_detached_records_commands() {
        let timers = DetachedTimers::new();

        timers.arm(TimerClass::Reminder, 42).await.unwrap();
        timers.cancel(TimerClass::Refresh).await.unwrap();

        assert_eq!(
            timers.issued(),
            vec![
                TimerCommand::Arm {
                    class: TimerClass::Reminder,
                    at_ms: 42
                },
                TimerCommand::Cancel(TimerClass::Refresh),
            ]
        );
    }
}
