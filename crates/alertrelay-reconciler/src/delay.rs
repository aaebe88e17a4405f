//! Delay/timer abstraction.
//!
//! The reconciler never sleeps on its own. Every "wait, then try again"
//! goes through a [`Delayer`], so tests can substitute [`ManualDelayer`]
//! and decide exactly when time has passed.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

/// The fire signal of a [`Timer`].
pub type FireSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Factory for timers.
pub trait Delayer: Send + Sync {
    /// Create a timer that fires once after `duration`.
    fn delay(&self, duration: Duration) -> Timer;
}

/// A one-shot timer.
///
/// Awaiting the timer waits for it to fire. [`Timer::cancel`] releases
/// whatever the backing [`Delayer`] holds for it; a cancelled timer never
/// fires.
pub struct Timer {
    duration: Duration,
    fired: FireSignal,
    canceller: Canceller,
}

impl Timer {
    /// Create a timer from a fire signal.
    pub fn new<F>(duration: Duration, fired: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            duration,
            fired: Box::pin(fired),
            canceller: Canceller(None),
        }
    }

    /// Run `hook` when the timer is cancelled.
    pub fn on_cancel(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.canceller = Canceller(Some(Box::new(hook)));
        self
    }

    /// The duration this timer was scheduled for.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Cancel the timer.
    pub fn cancel(self) {
        self.canceller.cancel();
    }

    /// Separate the fire signal from the cancel handle, so one task can
    /// wait on the timer while another keeps the right to cancel it.
    pub fn into_parts(self) -> (FireSignal, Canceller) {
        (self.fired, self.canceller)
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().fired.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// Cancel handle split off a [`Timer`].
pub struct Canceller(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Canceller {
    /// Cancel the timer this handle belongs to.
    pub fn cancel(mut self) {
        if let Some(hook) = self.0.take() {
            hook();
        }
    }
}

/// Timers backed by the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelayer;

impl Delayer for TokioDelayer {
    fn delay(&self, duration: Duration) -> Timer {
        Timer::new(duration, tokio::time::sleep(duration))
    }
}

/// Lifecycle of a timer created by [`ManualDelayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualTimerState {
    Pending,
    Fired,
    Cancelled,
}

struct ManualTimer {
    duration: Duration,
    state: ManualTimerState,
    fire: Option<oneshot::Sender<()>>,
}

/// Deterministic delayer for tests.
///
/// Timers fire only when told to, in creation order. Every scheduled
/// duration is recorded for assertions. Clones share the same timers.
#[derive(Clone, Default)]
pub struct ManualDelayer {
    timers: Arc<Mutex<Vec<ManualTimer>>>,
}

impl ManualDelayer {
    /// Create a delayer with no timers.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ManualTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Durations of every timer ever created, in creation order.
    pub fn scheduled(&self) -> Vec<Duration> {
        self.lock().iter().map(|t| t.duration).collect()
    }

    /// States of every timer ever created, in creation order.
    pub fn states(&self) -> Vec<ManualTimerState> {
        self.lock().iter().map(|t| t.state).collect()
    }

    /// Number of timers neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.count(ManualTimerState::Pending)
    }

    /// Number of timers fired so far.
    pub fn fired(&self) -> usize {
        self.count(ManualTimerState::Fired)
    }

    /// Number of timers cancelled so far.
    pub fn cancelled(&self) -> usize {
        self.count(ManualTimerState::Cancelled)
    }

    fn count(&self, state: ManualTimerState) -> usize {
        self.lock().iter().filter(|t| t.state == state).count()
    }

    /// Fire the oldest pending timer. Returns false if none is pending.
    pub fn fire_next(&self) -> bool {
        let mut timers = self.lock();
        match timers
            .iter_mut()
            .find(|t| t.state == ManualTimerState::Pending)
        {
            Some(timer) => {
                fire(timer);
                true
            }
            None => false,
        }
    }

    /// Fire every pending timer. Returns how many fired.
    pub fn fire_all(&self) -> usize {
        let mut timers = self.lock();
        let mut count = 0;
        for timer in timers
            .iter_mut()
            .filter(|t| t.state == ManualTimerState::Pending)
        {
            fire(timer);
            count += 1;
        }
        count
    }
}

fn fire(timer: &mut ManualTimer) {
    timer.state = ManualTimerState::Fired;
    if let Some(tx) = timer.fire.take() {
        // The waiter may be gone already; a timer nobody waits on still counts as fired.
        let _ = tx.send(());
    }
}

impl Delayer for ManualDelayer {
    fn delay(&self, duration: Duration) -> Timer {
        let (tx, rx) = oneshot::channel();
        let index = {
            let mut timers = self.lock();
            timers.push(ManualTimer {
                duration,
                state: ManualTimerState::Pending,
                fire: Some(tx),
            });
            timers.len() - 1
        };

        let fired = async move {
            // A dropped sender means cancelled: never fire.
            if rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        let timers = Arc::clone(&self.timers);
        Timer::new(duration, fired).on_cancel(move || {
            let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(timer) = timers.get_mut(index) {
                if timer.state == ManualTimerState::Pending {
                    timer.state = ManualTimerState::Cancelled;
                    timer.fire = None;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_waits_for_duration() {
        let start = tokio::time::Instant::now();
        let timer = TokioDelayer.delay(Duration::from_secs(5));
        assert_eq!(timer.duration(), Duration::from_secs(5));

        timer.await;

        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_manual_timer_fires_on_command() {
        let delayer = ManualDelayer::new();
        let timer = delayer.delay(Duration::from_secs(5));

        assert_eq!(delayer.pending(), 1);
        assert!(delayer.fire_next());
        timer.await;

        assert_eq!(delayer.fired(), 1);
        assert_eq!(delayer.scheduled(), vec![Duration::from_secs(5)]);
        assert!(!delayer.fire_next());
    }

    #[tokio::test]
    async fn test_manual_timers_fire_in_creation_order() {
        let delayer = ManualDelayer::new();
        let _first = delayer.delay(Duration::from_secs(1));
        let _second = delayer.delay(Duration::from_secs(2));

        assert!(delayer.fire_next());
        assert_eq!(
            delayer.states(),
            vec![ManualTimerState::Fired, ManualTimerState::Pending]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_manual_timer_never_fires() {
        let delayer = ManualDelayer::new();
        let timer = delayer.delay(Duration::from_secs(5));
        let (fired, canceller) = timer.into_parts();

        canceller.cancel();

        assert_eq!(delayer.cancelled(), 1);
        assert_eq!(delayer.fire_all(), 0);
        let outcome = tokio::time::timeout(Duration::from_secs(60), fired).await;
        assert!(outcome.is_err(), "cancelled timer fired");
    }

    #[tokio::test]
    async fn test_cancel_does_not_touch_other_timers() {
        let delayer = ManualDelayer::new();
        let first = delayer.delay(Duration::from_secs(5));
        let second = delayer.delay(Duration::from_secs(5));

        first.cancel();

        assert_eq!(delayer.pending(), 1);
        assert_eq!(delayer.fire_all(), 1);
        second.await;
    }

    #[test]
    fn test_cancel_after_fire_keeps_fired_state() {
        let delayer = ManualDelayer::new();
        let timer = delayer.delay(Duration::from_secs(5));
        delayer.fire_all();
        timer.cancel();
        assert_eq!(delayer.states(), vec![ManualTimerState::Fired]);
    }
}
