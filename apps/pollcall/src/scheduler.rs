use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Whether the surface showing the call is currently visible.
#[derive(Debug, Clone)]
pub struct Visibility(Arc<AtomicBool>);

impl Default for Visibility {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Visibility {
    pub fn set_visible(&self, visible: bool) {
        self.0.store(visible, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Refreshes allowed in flight at once: a slow one plus the next tick's.
const MAX_IN_FLIGHT: usize = 2;

/// Repeating refresh timer tied to one open call.
///
/// Ticks fire every `interval` regardless of how long the previous refresh
/// took, so a slow refresh can overlap the next one, but never more than
/// [`MAX_IN_FLIGHT`] run together. Ticks that land while the surface is hidden
/// or while that many refreshes are outstanding are skipped.
pub struct PollingScheduler {
    interval: Duration,
    visibility: Visibility,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    pub fn with_visibility(interval: Duration, visibility: Visibility) -> Self {
        Self {
            interval,
            visibility,
            task: Mutex::new(None),
        }
    }

    /// Begin ticking. Returns false if already running.
    pub fn start<F, Fut>(&self, refresh: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let period = self.interval;
        let visibility = self.visibility.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight: Vec<JoinHandle<()>> = Vec::with_capacity(MAX_IN_FLIGHT);
            loop {
                ticker.tick().await;
                if !visibility.is_visible() {
                    tracing::trace!("poll tick skipped while hidden");
                    continue;
                }
                in_flight.retain(|handle| !handle.is_finished());
                if in_flight.len() >= MAX_IN_FLIGHT {
                    tracing::trace!(in_flight = in_flight.len(), "poll tick skipped; refreshes outstanding");
                    continue;
                }
                in_flight.push(tokio::spawn(refresh()));
            }
        }));
        tracing::debug!(interval_ms = period.as_millis() as u64, "polling started");
        true
    }

    /// Cancel the timer. Refreshes already in flight run to completion.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                tracing::debug!("polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
