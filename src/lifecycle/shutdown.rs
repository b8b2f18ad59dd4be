//! shutdown.rs
//! Process-wide lifecycle state: RUNNING → STOP_REQUESTED → STOPPING → STOPPED.
//!
//! - The signal path only performs `request_stop` / `toggle_verbosity`: one atomic write each.
//! - The consumer loop polls `is_stop_requested` between channel waits and owns the
//!   `begin_stopping` / `mark_stopped` transitions.
//! - Transitions only move forward; repeated stop requests collapse into one.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::LifecycleError;
use crate::utils::logging::Verbosity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleState {
    Running = 0,
    StopRequested = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Running,
            1 => LifecycleState::StopRequested,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }
}

pub struct ShutdownCoordinator {
    state: AtomicU8,
    verbosity: Verbosity,
}

impl ShutdownCoordinator {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Running as u8),
            verbosity,
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// RUNNING → STOP_REQUESTED. Returns true only for the call that made the transition.
    pub fn request_stop(&self) -> bool {
        self.state
            .compare_exchange(
                LifecycleState::Running as u8,
                LifecycleState::StopRequested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Cheap, non-blocking; true from STOP_REQUESTED onwards.
    #[inline]
    pub fn is_stop_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) >= LifecycleState::StopRequested as u8
    }

    /// RUNNING | STOP_REQUESTED → STOPPING. Entering from RUNNING covers a loop that
    /// exits on its own (acquisition died, channel closed).
    pub fn begin_stopping(&self) -> Result<(), LifecycleError> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < LifecycleState::Stopping as u8).then_some(LifecycleState::Stopping as u8)
            })
            .map(|_| ())
            .map_err(|current| LifecycleError {
                from: LifecycleState::from_u8(current),
                to: LifecycleState::Stopping,
            })
    }

    /// STOPPING → STOPPED.
    pub fn mark_stopped(&self) -> Result<(), LifecycleError> {
        self.state
            .compare_exchange(
                LifecycleState::Stopping as u8,
                LifecycleState::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| LifecycleError {
                from: LifecycleState::from_u8(current),
                to: LifecycleState::Stopped,
            })
    }

    /// Flip between normal and verbose logging. Independent of the lifecycle state.
    /// Returns the new setting.
    pub fn toggle_verbosity(&self) -> bool {
        self.verbosity.toggle()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbosity.is_verbose()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}
