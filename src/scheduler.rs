//! Mode toggle scheduler.
//!
//! Flips the pending admission mode every `window_length_ms` and commits
//! it on the next tick.  A commit always runs as one step:
//!
//! ```text
//!   stop advertising ──▶ current = pending ──▶ reconfigure filter ──▶ start advertising
//! ```
//!
//! The stack's filter state is undefined if it changes while advertising
//! is live, so `current` is never written unless the stop succeeded.
//!
//! [`ModeToggleScheduler::tick`] is synchronous and deterministic; the
//! async [`ModeToggleScheduler::run`] loop wraps it with a reactor timer
//! and a stop signal, and [`spawn`] parks that loop on its own thread.

use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{info, warn};

use crate::app::events::AdmissionEvent;
use crate::app::mode::{Mode, ModeState};
use crate::app::ports::{EventSink, RadioPort};
use crate::app::strategy::{self, EnforcementStrategy};
use crate::config::AdmissionConfig;
use crate::error::Result;

/// Stop signal shared with whoever owns the scheduler thread.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Result of one [`ModeToggleScheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// A pending mode became current this tick.
    pub committed: Option<Mode>,
    /// The pending mode flipped this tick.
    pub flipped_to: Option<Mode>,
}

/// Sole writer of the current mode.  Alternates the pending mode every
/// window and commits it with advertising paused.
pub struct ModeToggleScheduler<R, S> {
    mode: Arc<ModeState>,
    radio: Arc<R>,
    strategy: &'static dyn EnforcementStrategy,
    sink: S,
    tick_ms: u32,
    window_ms: u32,
    /// Time accumulated toward the next flip.
    elapsed_ms: u32,
    /// Advertising restart failed after a commit; retry next tick.
    resume_pending: bool,
}

impl<R, S> ModeToggleScheduler<R, S>
where
    R: RadioPort,
    S: EventSink,
{
    /// Scheduler over `mode` with the tick, window and strategy from
    /// `config`.  The first flip is one full window away.
    pub fn new(mode: Arc<ModeState>, radio: Arc<R>, config: &AdmissionConfig, sink: S) -> Self {
        Self {
            mode,
            radio,
            strategy: strategy::select(config.strategy),
            sink,
            tick_ms: config.tick_interval_ms,
            window_ms: config.window_length_ms,
            elapsed_ms: 0,
            resume_pending: false,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.tick_ms))
    }

    /// Milliseconds until the pending mode flips.
    pub fn remaining_ms(&self) -> u32 {
        self.window_ms.saturating_sub(self.elapsed_ms)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// One scheduler step, run after each tick interval elapses.
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if self.resume_pending {
            self.resume_advertising();
        }

        // 1. Commit an outstanding transition.
        let pending = self.mode.pending();
        if pending != self.mode.current() {
            match self.commit(pending) {
                Ok(()) => outcome.committed = Some(pending),
                Err(e) => warn!("Scheduler: commit to {} deferred: {}", pending, e),
            }
        }

        // 2. Accumulate toward the next flip.
        self.elapsed_ms = self.elapsed_ms.saturating_add(self.tick_ms);
        if self.elapsed_ms >= self.window_ms {
            let next = self.mode.current().opposite();
            self.mode.request(next);
            self.elapsed_ms = 0;
            info!("Scheduler: pending mode -> {}", next);
            self.sink.emit(&AdmissionEvent::PendingChanged { to: next });
            outcome.flipped_to = Some(next);
        }

        // 3. Countdown diagnostic.
        self.sink.emit(&AdmissionEvent::WindowRemaining {
            mode: self.mode.current(),
            remaining_ms: self.remaining_ms(),
        });

        outcome
    }

    /// Commit `mode` immediately, outside the regular tick cadence.  The
    /// window restarts so `mode` lasts a full window.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.mode.request(mode);
        if mode == self.mode.current() {
            return Ok(());
        }
        self.commit(mode)
    }

    fn commit(&mut self, to: Mode) -> Result<()> {
        let from = self.mode.current();

        self.radio.stop_advertising()?;

        self.mode.commit(to);
        self.elapsed_ms = 0;

        let filter = self.strategy.advertising_filter(to);
        if let Err(e) = self.radio.set_advertising_filter(filter) {
            warn!("Scheduler: filter {:?} not applied: {}", filter, e);
        }

        self.resume_advertising();

        info!("Scheduler: mode {} -> {}", from, to);
        self.sink.emit(&AdmissionEvent::ModeCommitted { from, to });
        Ok(())
    }

    fn resume_advertising(&mut self) {
        match self.radio.start_advertising() {
            Ok(()) => self.resume_pending = false,
            Err(e) => {
                warn!("Scheduler: advertising restart failed: {}", e);
                self.resume_pending = true;
            }
        }
    }

    /// Tick until `stop` is signalled.
    pub async fn run(&mut self, stop: &StopSignal) {
        info!(
            "Scheduler: running (tick={}ms, window={}ms, strategy={})",
            self.tick_ms,
            self.window_ms,
            self.strategy.name()
        );
        let interval = self.tick_interval();
        loop {
            let stopped = futures_lite::future::or(
                async {
                    stop.wait().await;
                    true
                },
                async {
                    async_io_mini::Timer::after(interval).await;
                    false
                },
            )
            .await;

            if stopped {
                info!("Scheduler: stopped");
                return;
            }
            self.tick();
        }
    }
}

/// Run `scheduler` on a dedicated thread until `stop` is signalled.
/// The scheduler is handed back on join.
pub fn spawn<R, S>(
    mut scheduler: ModeToggleScheduler<R, S>,
    stop: Arc<StopSignal>,
) -> std::io::Result<std::thread::JoinHandle<ModeToggleScheduler<R, S>>>
where
    R: RadioPort + Send + Sync + 'static,
    S: EventSink + Send + 'static,
{
    std::thread::Builder::new()
        .name("mode-toggle".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            let executor: edge_executor::LocalExecutor<'_, 4> =
                edge_executor::LocalExecutor::new();
            futures_lite::future::block_on(executor.run(scheduler.run(&stop)));
            scheduler
        })
}
