//! Watchdog state machine and command read loop.
//!
//! State transitions:
//! ```text
//!            arm / start                 tick
//!   ┌──────────────────────┐      ┌──────────────┐
//!   ▼                      │      │              ▼
//! Armed ──── tick ────▶ Unarmed ──┘          (trip: clear ids, exit 32)
//! ```
//! Every tick consumes the arm. A tick that finds the watchdog already
//! unarmed trips it, so the owner has to arm at least once per period and the
//! watchdog fires after two silent periods at most.

use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;

use crate::ipc::codec::{self, Command};
use crate::types::{ChannelClosePolicy, Error, Result, WatchdogConfig};
use crate::watchdog::timer::{ArmTimer, TimerFlow};
use crate::watchdog::tracked::TrackedIdSet;

/// Pause after a failed channel read before the next attempt.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Arm state observed by a tick. Never exposed outside the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArmState {
    Armed,
    Unarmed,
}

/// What the fatal action does once the tracked ids are cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripAction {
    /// Terminate the process with this status. Never returns.
    Exit { code: i32 },
    /// Stop the watchdog and let `run()` return [`RunOutcome::Tripped`].
    Return,
}

/// Why `run()` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A `quit` command was received.
    Quit,
    /// The channel closed under [`ChannelClosePolicy::Quit`].
    ChannelClosed,
    /// The deadline expired under [`TripAction::Return`].
    Tripped,
}

/// Supervisory capability: what to do on trip, and the loop that drives it.
#[async_trait]
pub trait Watchdog: Send {
    /// Fatal action taken when the owner failed to arm in time.
    fn on_trip(&self);

    /// Run until quit or trip.
    async fn run(&mut self) -> Result<RunOutcome>;
}

/// State shared by the read loop and the ticker task.
#[derive(Debug)]
struct WatchdogState {
    config: WatchdogConfig,
    trip_action: TripAction,
    tracked: Arc<TrackedIdSet>,
    armed: AtomicBool,
    trips: AtomicUsize,
}

impl WatchdogState {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Consume the arm. Returns the state the tick found.
    fn consume_arm(&self) -> ArmState {
        if self.armed.swap(false, Ordering::SeqCst) {
            ArmState::Armed
        } else {
            ArmState::Unarmed
        }
    }

    fn on_tick(&self) -> TimerFlow {
        match self.consume_arm() {
            ArmState::Armed => {
                tracing::trace!("watchdog_tick: arm consumed");
                TimerFlow::Continue
            }
            ArmState::Unarmed => {
                self.trip();
                TimerFlow::Stop
            }
        }
    }

    fn trip(&self) {
        let cleared = self.tracked.clear();
        self.trips.fetch_add(1, Ordering::SeqCst);
        tracing::error!(
            "watchdog_tripped: not armed for two periods, period_ms={}, cleared_ids={}",
            self.config.period.as_millis(),
            cleared,
        );

        if let TripAction::Exit { code } = self.trip_action {
            std::process::exit(code);
        }
    }

    fn apply(&self, command: Command) -> ControlFlow<RunOutcome> {
        match command {
            Command::Add(id) => {
                let inserted = self.tracked.add(id.clone());
                tracing::debug!("id_added: id={}, new={}", id, inserted);
            }
            Command::Remove(id) => {
                let removed = self.tracked.remove(&id);
                tracing::debug!("id_removed: id={}, present={}", id, removed);
            }
            Command::Clear => {
                let count = self.tracked.clear();
                tracing::info!("tracked_ids_cleared: count={}", count);
            }
            Command::Dump => {
                let snapshot = self.tracked.snapshot();
                let ids: Vec<&str> = snapshot.iter().map(|id| id.as_str()).collect();
                tracing::info!("tracked_ids: count={} ids={:?}", ids.len(), ids);
            }
            Command::Arm => {
                self.arm();
                tracing::debug!("watchdog_armed");
            }
            Command::Quit => {
                tracing::info!("watchdog_quit");
                return ControlFlow::Break(RunOutcome::Quit);
            }
        }
        ControlFlow::Continue(())
    }
}

/// Watchdog reading its commands from a byte channel.
#[derive(Debug)]
pub struct PipeWatchdog<R> {
    state: Arc<WatchdogState>,
    reader: Option<R>,
}

impl<R> PipeWatchdog<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create an armed watchdog that exits the process when it trips.
    pub fn new(config: WatchdogConfig, reader: R) -> Result<Self> {
        let trip_action = TripAction::Exit {
            code: config.trip_exit_code,
        };
        Self::with_trip_action(config, reader, trip_action)
    }

    /// Create an armed watchdog with an explicit fatal action.
    pub fn with_trip_action(
        config: WatchdogConfig,
        reader: R,
        trip_action: TripAction,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(WatchdogState {
                config,
                trip_action,
                tracked: Arc::new(TrackedIdSet::new()),
                armed: AtomicBool::new(true),
                trips: AtomicUsize::new(0),
            }),
            reader: Some(reader),
        })
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.state.config
    }

    /// Handle on the tracked id set, valid after `run()` returns.
    pub fn tracked(&self) -> Arc<TrackedIdSet> {
        self.state.tracked.clone()
    }

    #[cfg(test)]
    fn arm_state(&self) -> ArmState {
        if self.state.armed.load(Ordering::SeqCst) {
            ArmState::Armed
        } else {
            ArmState::Unarmed
        }
    }

    /// How many times the fatal action ran.
    pub fn trip_count(&self) -> usize {
        self.state.trips.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R> Watchdog for PipeWatchdog<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn on_trip(&self) {
        self.state.trip();
    }

    async fn run(&mut self) -> Result<RunOutcome> {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| Error::internal("watchdog channel already consumed"))?;

        let (trip_tx, trip_rx) = oneshot::channel::<()>();
        let mut trip_tx = Some(trip_tx);
        let timer = ArmTimer::new(self.state.config.period);
        let ticker_state = self.state.clone();
        let _ticker = timer.start(move || {
            let flow = ticker_state.on_tick();
            if flow == TimerFlow::Stop {
                if let Some(tx) = trip_tx.take() {
                    let _ = tx.send(());
                }
            }
            flow
        });

        tracing::info!(
            "watchdog_started: period_ms={}, read_buffer_bytes={}, on_channel_closed={}",
            self.state.config.period.as_millis(),
            self.state.config.read_buffer_bytes,
            self.state.config.on_channel_closed.as_str(),
        );

        let outcome = tokio::select! {
            outcome = read_loop(&self.state, &mut reader) => outcome,
            Ok(()) = trip_rx => RunOutcome::Tripped,
        };

        timer.stop();
        Ok(outcome)
    }
}

/// Read, decode and apply commands until one of them ends the run.
async fn read_loop<R>(state: &WatchdogState, reader: &mut R) -> RunOutcome
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        match codec::read_message(reader, state.config.read_buffer_bytes).await {
            Ok(Some(message)) => {
                tracing::debug!(
                    "message_received: bytes={}, raw={:?}",
                    message.len(),
                    String::from_utf8_lossy(&message),
                );
                for command in codec::parse(&message) {
                    if let ControlFlow::Break(outcome) = state.apply(command) {
                        return outcome;
                    }
                }
            }
            Ok(None) => match state.config.on_channel_closed {
                ChannelClosePolicy::Quit => {
                    tracing::info!("channel_closed: treating as quit");
                    return RunOutcome::ChannelClosed;
                }
                ChannelClosePolicy::Silence => {
                    tracing::warn!("channel_closed: no further arms possible, waiting for deadline");
                    std::future::pending::<()>().await;
                }
            },
            Err(e) => {
                tracing::warn!("channel_read_failed: {}", e);
                tokio::time::sleep(READ_RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackedId;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    const PERIOD: Duration = Duration::from_millis(100);

    fn test_watchdog() -> (DuplexStream, PipeWatchdog<DuplexStream>) {
        let (tx, rx) = tokio::io::duplex(256);
        let wd = PipeWatchdog::with_trip_action(
            WatchdogConfig::with_period(PERIOD),
            rx,
            TripAction::Return,
        )
        .unwrap();
        (tx, wd)
    }

    fn ids(wd: &PipeWatchdog<DuplexStream>) -> Vec<String> {
        wd.tracked()
            .snapshot()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_starts_armed_with_exit_action() {
        let (_tx, rx) = tokio::io::duplex(8);
        let wd = PipeWatchdog::new(WatchdogConfig::default(), rx).unwrap();
        assert_eq!(wd.arm_state(), ArmState::Armed);
        assert_eq!(wd.state.trip_action, TripAction::Exit { code: 32 });
    }

    #[test]
    fn test_trip_action_fixed_at_construction() {
        let (_tx, rx) = tokio::io::duplex(8);
        let config = WatchdogConfig {
            trip_exit_code: 40,
            ..WatchdogConfig::default()
        };
        let wd = PipeWatchdog::with_trip_action(config, rx, TripAction::Return).unwrap();
        assert_eq!(wd.state.trip_action, TripAction::Return);

        let (_tx, rx) = tokio::io::duplex(8);
        let result = PipeWatchdog::with_trip_action(
            WatchdogConfig::with_period(Duration::ZERO),
            rx,
            TripAction::Return,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (_tx, rx) = tokio::io::duplex(8);
        let result = PipeWatchdog::new(WatchdogConfig::with_period(Duration::ZERO), rx);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_tick_consumes_arm_then_trips() {
        let (_tx, wd) = test_watchdog();
        wd.tracked().add(TrackedId::must("A"));

        assert_eq!(wd.state.on_tick(), TimerFlow::Continue);
        assert_eq!(wd.arm_state(), ArmState::Unarmed);
        assert_eq!(wd.trip_count(), 0);

        assert_eq!(wd.state.on_tick(), TimerFlow::Stop);
        assert_eq!(wd.trip_count(), 1);
        assert!(wd.tracked().is_empty());
    }

    #[test]
    fn test_arm_between_ticks_prevents_trip() {
        let (_tx, wd) = test_watchdog();
        for _ in 0..10 {
            assert_eq!(wd.state.on_tick(), TimerFlow::Continue);
            wd.state.apply(Command::Arm);
        }
        assert_eq!(wd.trip_count(), 0);
    }

    #[test]
    fn test_dump_does_not_mutate() {
        let (_tx, wd) = test_watchdog();
        wd.state.apply(Command::Add(TrackedId::must("A")));
        wd.state.apply(Command::Add(TrackedId::must("B")));
        let before = ids(&wd);
        assert_eq!(wd.state.apply(Command::Dump), ControlFlow::Continue(()));
        assert_eq!(ids(&wd), before);
    }

    #[test]
    fn test_on_trip_clears_tracked_ids() {
        let (_tx, wd) = test_watchdog();
        wd.tracked().add(TrackedId::must("A"));
        wd.on_trip();
        assert!(wd.tracked().is_empty());
        assert_eq!(wd.trip_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_returns_with_final_set() {
        let (mut tx, mut wd) = test_watchdog();
        tx.write_all(b"add A;add B;rm A;quit;").await.unwrap();

        let outcome = wd.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Quit);
        assert_eq!(ids(&wd), vec!["B".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_trips_after_two_periods() {
        let (_tx, mut wd) = test_watchdog();
        let start = tokio::time::Instant::now();

        let outcome = wd.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Tripped);
        assert_eq!(wd.trip_count(), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= PERIOD * 2, "tripped too early: {elapsed:?}");
        assert!(elapsed < PERIOD * 3, "tripped too late: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_arming_keeps_watchdog_alive() {
        let (mut tx, mut wd) = test_watchdog();

        let driver = tokio::spawn(async move {
            for _ in 0..20 {
                tokio::time::sleep(PERIOD / 2).await;
                tx.write_all(b"arm;").await.unwrap();
            }
            tx.write_all(b"quit;").await.unwrap();
            tx
        });

        let outcome = wd.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Quit);
        assert_eq!(wd.trip_count(), 0);
        let _ = driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_under_silence_still_trips() {
        let (tx, mut wd) = test_watchdog();
        drop(tx);
        assert_eq!(wd.run().await.unwrap(), RunOutcome::Tripped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_under_quit_policy() {
        let (tx, rx) = tokio::io::duplex(8);
        let config = WatchdogConfig {
            on_channel_closed: ChannelClosePolicy::Quit,
            ..WatchdogConfig::with_period(PERIOD)
        };
        let mut wd = PipeWatchdog::with_trip_action(config, rx, TripAction::Return).unwrap();
        drop(tx);

        assert_eq!(wd.run().await.unwrap(), RunOutcome::ChannelClosed);
        assert_eq!(wd.trip_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_twice_is_an_error() {
        let (mut tx, mut wd) = test_watchdog();
        tx.write_all(b"quit;").await.unwrap();
        wd.run().await.unwrap();
        assert!(matches!(wd.run().await, Err(Error::Internal(_))));
    }
}
