use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::task::PollTask;
use super::PollTaskError;
use crate::bus::panic_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    /// Never started.
    Idle,
    /// Waiting for the next tick.
    Scheduled,
    /// A tick is in flight.
    Running,
    /// Interval was `<= 0`, or `stop()` was called.
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStats {
    pub completed: u64,
    pub failed: u64,
    /// Interval ticks that elapsed while a previous tick was still running.
    pub skipped: u64,
    /// Results dropped because the coordinator stopped mid-tick.
    pub discarded: u64,
    pub last_success_at: Option<DateTime<Utc>>,
}

struct Shared {
    state: Mutex<PollState>,
    stats: Mutex<PollStats>,
}

impl Shared {
    /// Move to `next` unless this run was stopped. Both this and
    /// `PollingCoordinator::stop` hold the state lock, so a stopped run can
    /// never flip the state back.
    fn transition(&self, stop: &watch::Receiver<bool>, next: PollState) -> bool {
        let mut state = self.state.lock().expect("poll state mutex poisoned");
        if is_stopped(stop) {
            return false;
        }
        *state = next;
        true
    }

    fn record<F: FnOnce(&mut PollStats)>(&self, f: F) {
        f(&mut self.stats.lock().expect("poll stats mutex poisoned"));
    }
}

struct ActiveRun {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs a [`PollTask`] after an initial delay and then at a fixed interval.
///
/// Ticks never overlap: ticks run one after another on a single task, and an
/// interval boundary that passes while a tick is still in flight is skipped.
/// A failed tick is logged and does not affect later ticks.
pub struct PollingCoordinator {
    name: String,
    shared: Arc<Shared>,
    run: Mutex<Option<ActiveRun>>,
}

impl PollingCoordinator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(PollState::Idle),
                stats: Mutex::new(PollStats::default()),
            }),
            run: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start polling. An `interval_ms <= 0` leaves the coordinator `Disabled`
    /// and the task is never invoked. Starting an active coordinator restarts
    /// it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T: PollTask>(&self, interval_ms: i64, initial_delay_ms: u64, task: Arc<T>) -> PollState {
        self.stop();

        if interval_ms <= 0 {
            tracing::info!(poller = %self.name, interval_ms, "polling disabled");
            return PollState::Disabled;
        }

        let period = Duration::from_millis(interval_ms as u64);
        let first_tick = Instant::now() + Duration::from_millis(initial_delay_ms);
        let (stop_tx, stop_rx) = watch::channel(false);

        *self.shared.state.lock().expect("poll state mutex poisoned") = PollState::Scheduled;
        let handle = tokio::spawn(run_loop(
            self.name.clone(),
            self.shared.clone(),
            task,
            first_tick,
            period,
            stop_rx,
        ));

        tracing::info!(
            poller = %self.name,
            interval_ms,
            initial_delay_ms,
            "polling scheduled"
        );
        *self.run.lock().expect("poll run mutex poisoned") = Some(ActiveRun {
            stop: stop_tx,
            handle,
        });
        PollState::Scheduled
    }

    /// Cancel all future ticks. A tick already in flight finishes, but its
    /// result is discarded.
    pub fn stop(&self) {
        let run = self.run.lock().expect("poll run mutex poisoned");
        let mut state = self.shared.state.lock().expect("poll state mutex poisoned");
        if let Some(run) = run.as_ref() {
            if !*run.stop.borrow() {
                let _ = run.stop.send(true);
                tracing::debug!(poller = %self.name, "polling stopped");
            }
        }
        *state = PollState::Disabled;
    }

    pub fn state(&self) -> PollState {
        *self.shared.state.lock().expect("poll state mutex poisoned")
    }

    pub fn stats(&self) -> PollStats {
        self.shared.stats.lock().expect("poll stats mutex poisoned").clone()
    }

    /// Whether the background loop is still alive. After `stop` it lingers
    /// until an in-flight tick completes.
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .expect("poll run mutex poisoned")
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }
}

impl Drop for PollingCoordinator {
    fn drop(&mut self) {
        if let Ok(mut run) = self.run.lock() {
            if let Some(run) = run.take() {
                let _ = run.stop.send(true);
            }
        }
    }
}

fn is_stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

async fn run_loop<T: PollTask>(
    name: String,
    shared: Arc<Shared>,
    task: Arc<T>,
    first_tick: Instant,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_finished: Option<Instant> = None;

    loop {
        let scheduled = tokio::select! {
            biased;
            _ = stop.changed() => break,
            scheduled = ticker.tick() => scheduled,
        };

        // A boundary that passed while the previous tick ran. The interval
        // has already moved past every boundary up to now.
        if last_finished.is_some_and(|finished| scheduled < finished) {
            let late = Instant::now().saturating_duration_since(scheduled);
            let dropped = (late.as_nanos() / period.as_nanos().max(1)) as u64 + 1;
            tracing::debug!(poller = %name, skipped = dropped, "tick overran interval");
            shared.record(|s| s.skipped += dropped);
            continue;
        }

        if !shared.transition(&stop, PollState::Running) {
            break;
        }

        let result = match AssertUnwindSafe(task.fetch()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PollTaskError::Panicked(panic_message(&panic))),
        };
        last_finished = Some(Instant::now());

        if is_stopped(&stop) {
            tracing::debug!(poller = %name, "stopped during tick, discarding result");
            shared.record(|s| s.discarded += 1);
            break;
        }

        let result = result.and_then(|output| {
            catch_unwind(AssertUnwindSafe(|| task.apply(output)))
                .map_err(|panic| PollTaskError::Panicked(panic_message(&panic)))
        });
        match result {
            Ok(()) => {
                shared.record(|s| {
                    s.completed += 1;
                    s.last_success_at = Some(Utc::now());
                });
            }
            Err(e) => {
                tracing::warn!(poller = %name, "poll tick failed: {e}");
                shared.record(|s| s.failed += 1);
            }
        }

        if !shared.transition(&stop, PollState::Scheduled) {
            break;
        }
    }
}
