//! Deferred and periodic actions.
//!
//! `schedule` runs a one-shot action after a delay, either inline or on a
//! background task. `ArmTimer` is the repeating form: it calls a tick
//! closure once per period until the closure asks to stop or the timer is
//! cancelled.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Where a scheduled action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Wait in the caller, then run the action before returning.
    Inline,
    /// Return immediately; a spawned task waits and runs the action.
    Background,
}

/// Returned by a tick closure to keep or stop the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFlow {
    Continue,
    Stop,
}

/// Run `action` once, no earlier than `delay` from now.
///
/// With [`Dispatch::Background`] the returned handle completes after the
/// action ran. There is no way to retract a scheduled action.
pub async fn schedule<F>(delay: Duration, dispatch: Dispatch, action: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match dispatch {
        Dispatch::Inline => {
            tokio::time::sleep(delay).await;
            action();
            None
        }
        Dispatch::Background => Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        })),
    }
}

/// Repeating timer driving the arm deadline.
#[derive(Debug)]
pub struct ArmTimer {
    period: Duration,
    cancel: CancellationToken,
}

impl ArmTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            cancel: CancellationToken::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking in the background.
    ///
    /// The first tick happens one full period after this call. A late tick
    /// pushes the following ones back instead of firing them in a burst.
    pub fn start<F>(&self, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> TimerFlow + Send + 'static,
    {
        let period = self.period;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("arm_timer_cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if tick() == TimerFlow::Stop {
                            tracing::debug!("arm_timer_stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Cancel the repeating timer. Already-running ticks complete.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ArmTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
