//! Reconnection orchestration.
//!
//! The [`ReconnectionMonitor`] keeps a registry of observers, one per
//! active subscription. While a reconnect is in progress it notifies every
//! observer on a jittered backoff cadence; each notification re-issues the
//! subscription's start action. A halt stops further notifications, and an
//! irrevocable close clears the registry for provider shutdown.

use crate::retry::jittered_exponential_backoff;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observer invoked on each reconnection notification.
pub(crate) type ReconnectObserver = Arc<dyn Fn() + Send + Sync>;

/// Control events recorded by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectEvent {
    /// Begin notifying observers on the backoff cadence
    StartReconnect,
    /// Stop notifying observers
    HaltReconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Reconnecting,
    Closed,
}

struct Inner {
    observers: HashMap<u64, ReconnectObserver>,
    next_observer_id: u64,
    status: Status,
    /// Incremented on every StartReconnect; a driver task exits when the
    /// epoch it was spawned for is no longer current.
    epoch: u64,
}

/// Observer registry plus a start/halt control driven by connection-state
/// transitions.
pub(crate) struct ReconnectionMonitor {
    inner: Arc<Mutex<Inner>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReconnectionMonitor {
    pub(crate) fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                observers: HashMap::new(),
                next_observer_id: 0,
                status: Status::Idle,
                epoch: 0,
            })),
            base_delay,
            max_delay,
        }
    }

    /// Register an observer; returns a handle for removal. Observers added
    /// while a reconnect is in progress are picked up on the next cadence
    /// tick.
    pub(crate) fn add_observer(&self, observer: ReconnectObserver) -> u64 {
        let mut inner = self.inner.lock().expect("reconnection monitor lock poisoned");
        let id = inner.next_observer_id;
        inner.next_observer_id += 1;
        if inner.status != Status::Closed {
            inner.observers.insert(id, observer);
        }
        id
    }

    /// Remove a previously registered observer.
    pub(crate) fn remove_observer(&self, id: u64) {
        let mut inner = self.inner.lock().expect("reconnection monitor lock poisoned");
        inner.observers.remove(&id);
    }

    /// Record a control event.
    pub(crate) fn record(&self, event: ReconnectEvent) {
        match event {
            ReconnectEvent::StartReconnect => self.start(),
            ReconnectEvent::HaltReconnect => self.halt(),
        }
    }

    fn start(&self) {
        let epoch = {
            let mut inner = self.inner.lock().expect("reconnection monitor lock poisoned");
            if inner.status != Status::Idle {
                return;
            }
            inner.status = Status::Reconnecting;
            inner.epoch += 1;
            inner.epoch
        };

        log::info!("[appsync-realtime] Reconnection started");
        let inner = self.inner.clone();
        let base_delay = self.base_delay;
        let max_delay = self.max_delay;
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let observers: Vec<ReconnectObserver> = {
                    let guard = inner.lock().expect("reconnection monitor lock poisoned");
                    if guard.status != Status::Reconnecting || guard.epoch != epoch {
                        return;
                    }
                    guard.observers.values().cloned().collect()
                };

                log::debug!(
                    "[appsync-realtime] Notifying {} subscription(s) to restart (attempt {})",
                    observers.len(),
                    attempt + 1
                );
                for observer in observers {
                    observer();
                }

                let delay = jittered_exponential_backoff(base_delay, attempt, max_delay);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
            }
        });
    }

    fn halt(&self) {
        let mut inner = self.inner.lock().expect("reconnection monitor lock poisoned");
        if inner.status == Status::Reconnecting {
            log::debug!("[appsync-realtime] Reconnection halted");
            inner.status = Status::Idle;
        }
    }

    /// Irrevocably shut the monitor down and drop every observer. Further
    /// events and registrations are ignored.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock().expect("reconnection monitor lock poisoned");
        inner.status = Status::Closed;
        inner.observers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_observer() -> (ReconnectObserver, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let observer: ReconnectObserver = Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (observer, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_notifies_repeatedly_until_halt() {
        let monitor =
            ReconnectionMonitor::new(Duration::from_millis(100), Duration::from_secs(1));
        let (observer, count) = counting_observer();
        monitor.add_observer(observer);

        monitor.record(ReconnectEvent::StartReconnect);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let while_active = count.load(Ordering::SeqCst);
        assert!(while_active >= 2, "expected repeated notifications, got {}", while_active);

        monitor.record(ReconnectEvent::HaltReconnect);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let after_halt = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_halt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_while_active() {
        let monitor =
            ReconnectionMonitor::new(Duration::from_secs(10), Duration::from_secs(60));
        let (observer, count) = counting_observer();
        monitor.add_observer(observer);

        monitor.record(ReconnectEvent::StartReconnect);
        monitor.record(ReconnectEvent::StartReconnect);
        tokio::time::sleep(Duration::from_secs(1)).await;
        // One driver, one immediate notification.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_observer_is_not_notified() {
        let monitor =
            ReconnectionMonitor::new(Duration::from_millis(100), Duration::from_secs(1));
        let (observer, count) = counting_observer();
        let id = monitor.add_observer(observer);
        monitor.remove_observer(id);

        monitor.record(ReconnectEvent::StartReconnect);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        monitor.record(ReconnectEvent::HaltReconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_irrevocable() {
        let monitor =
            ReconnectionMonitor::new(Duration::from_millis(100), Duration::from_secs(1));
        let (observer, count) = counting_observer();
        monitor.add_observer(observer);
        monitor.close();

        monitor.record(ReconnectEvent::StartReconnect);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Registrations after close are dropped.
        let (observer, count) = counting_observer();
        monitor.add_observer(observer);
        monitor.record(ReconnectEvent::StartReconnect);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
