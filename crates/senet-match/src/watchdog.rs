//! Cancellable one-shot timers, one slot per side.
//!
//! A [`Watchdog`] lives inside a match's state and is only touched while the
//! match lock is held. Each arming gets a fresh generation number that is
//! handed to the expiry callback; the callback must re-check under the lock
//! that its generation is still the current one before acting, which makes an
//! expiry that raced a cancellation harmless.

use std::future::Future;
use std::time::Duration;

use senet_rules::Side;
use tokio::task::AbortHandle;

struct Armed {
    generation: u64,
    handle: AbortHandle,
}

/// Per-side reconnect/liveness timers for one match.
#[derive(Default)]
pub struct Watchdog {
    timers: [Option<Armed>; 2],
    next_generation: u64,
}

impl Watchdog {
    /// A watchdog with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire(generation)` to run after `duration`, replacing
    /// and aborting any timer already armed for `side`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, side: Side, duration: Duration, on_expire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.next_generation += 1;
        let generation = self.next_generation;

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_expire(generation).await;
        });

        let armed = Armed {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = self.timers[side.index()].replace(armed) {
            previous.handle.abort();
            tracing::trace!("Re-armed watchdog for {side}, dropped generation {}", previous.generation);
        }
        generation
    }

    /// Abort the timer for `side`. Returns whether one was armed.
    pub fn cancel(&mut self, side: Side) -> bool {
        match self.timers[side.index()].take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every armed timer.
    pub fn cancel_all(&mut self) {
        for side in Side::BOTH {
            self.cancel(side);
        }
    }

    /// Whether a timer is outstanding for `side`.
    pub fn is_armed(&self, side: Side) -> bool {
        self.timers[side.index()].is_some()
    }

    /// Generation of the timer outstanding for `side`, if any.
    pub fn generation(&self, side: Side) -> Option<u64> {
        self.timers[side.index()].as_ref().map(|armed| armed.generation)
    }

    /// Clear the slot for `side` if it still holds `generation`. Called by the
    /// expiring timer itself, so nothing is aborted.
    pub fn take_if_current(&mut self, side: Side, generation: u64) -> bool {
        if self.generation(side) == Some(generation) {
            self.timers[side.index()] = None;
            true
        } else {
            false
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn record(sink: &Arc<AtomicU64>) -> impl FnOnce(u64) -> std::future::Ready<()> + Send + 'static {
        let sink = Arc::clone(sink);
        move |generation| {
            sink.store(generation, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut watchdog = Watchdog::new();
        let generation = watchdog.arm(Side::Second, Duration::from_secs(10), record(&fired));
        assert!(watchdog.is_armed(Side::Second));
        assert!(!watchdog.is_armed(Side::First));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), generation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut watchdog = Watchdog::new();
        watchdog.arm(Side::First, Duration::from_secs(1), record(&fired));

        assert!(watchdog.cancel(Side::First));
        assert!(!watchdog.cancel(Side::First));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut watchdog = Watchdog::new();
        let first = watchdog.arm(Side::First, Duration::from_secs(1), record(&fired));
        let second = watchdog.arm(Side::First, Duration::from_secs(3), record(&fired));
        assert_ne!(first, second);
        assert_eq!(watchdog.generation(Side::First), Some(second));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "replaced timer must not fire");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_if_current_ignores_stale_generation() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut watchdog = Watchdog::new();
        let stale = watchdog.arm(Side::Second, Duration::from_secs(1), record(&fired));
        let current = watchdog.arm(Side::Second, Duration::from_secs(1), record(&fired));

        assert!(!watchdog.take_if_current(Side::Second, stale));
        assert!(watchdog.is_armed(Side::Second));
        assert!(watchdog.take_if_current(Side::Second, current));
        assert!(!watchdog.is_armed(Side::Second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_timers() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut watchdog = Watchdog::new();
        watchdog.arm(Side::First, Duration::from_secs(1), record(&fired));
        watchdog.arm(Side::Second, Duration::from_secs(1), record(&fired));
        drop(watchdog);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
