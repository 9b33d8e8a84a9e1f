//! Periodic asynchronous work.
//!
//! - `PollingCoordinator`: `Idle → Scheduled → Running → Scheduled …` or
//!   `Disabled`, with non-overlapping ticks and per-tick failure isolation
//! - `PollTask`: fetch/apply split so a stopped coordinator can drop results
//! - `PollInterval`: interval configuration parsed from preferences

mod coordinator;
mod interval;
mod task;

pub use coordinator::{PollState, PollStats, PollingCoordinator};
pub use interval::{ConfigParseError, PollInterval};
pub use task::{poll_fn, PollFn, PollTask};

use crate::soa::SoaError;

/// Failure of a single tick. Logged by the coordinator, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum PollTaskError {
    #[error("poll request failed: {0}")]
    Request(#[from] SoaError),
    #[error("unexpected poll response: {0}")]
    InvalidResponse(String),
    #[error("poll task panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}
