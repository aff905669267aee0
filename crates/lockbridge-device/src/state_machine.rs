//! Per-device lifecycle state machine.
//!
//! # States
//!
//! - `Online`: reachable, polling on its interval
//! - `Updating`: a debounced write or access-code mutation is executing
//! - `Offline`: the last poll or write hit a cloud fault; polling is stopped
//! - `Removed`: unregistered for good (terminal)
//!
//! # Valid Transitions
//!
//! - Online ⇄ Updating
//! - Online → Offline, Updating → Offline
//! - Offline → Online (found again by a discovery sweep)
//! - Online → Removed, Offline → Removed
//!
//! # Examples
//!
//! ```
//! use lockbridge_device::{DeviceState, DeviceStateMachine};
//!
//! let mut machine = DeviceStateMachine::new();
//! assert_eq!(machine.current_state(), DeviceState::Online);
//!
//! machine.transition_to(DeviceState::Offline).unwrap();
//! assert!(machine.transition_to(DeviceState::Updating).is_err());
//! ```

use lockbridge_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Reachable and polling.
    Online,

    /// A user-initiated operation is executing.
    Updating,

    /// Unreachable; polling stopped until rediscovered.
    Offline,

    /// Permanently unregistered.
    Removed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Online => "Online",
            DeviceState::Updating => "Updating",
            DeviceState::Offline => "Offline",
            DeviceState::Removed => "Removed",
        };
        write!(f, "{s}")
    }
}

impl DeviceState {
    /// Check if a transition to `target` is valid from this state.
    ///
    /// ```
    /// use lockbridge_device::DeviceState;
    ///
    /// assert!(DeviceState::Offline.can_transition_to(&DeviceState::Online));
    /// assert!(!DeviceState::Removed.can_transition_to(&DeviceState::Online));
    /// ```
    pub fn can_transition_to(&self, target: &DeviceState) -> bool {
        matches!(
            (self, target),
            (DeviceState::Online, DeviceState::Updating | DeviceState::Offline | DeviceState::Removed)
                | (DeviceState::Updating, DeviceState::Online | DeviceState::Offline)
                | (DeviceState::Offline, DeviceState::Online | DeviceState::Removed)
        )
    }
}

/// A recorded state change.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: DeviceState,
    pub to: DeviceState,
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: DeviceState, to: DeviceState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }
}

/// Lifecycle state and when it was entered.
///
/// Not thread-safe; the owning coordinator keeps it behind its own lock.
#[derive(Debug)]
pub struct DeviceStateMachine {
    current_state: DeviceState,
    state_entered_at: Instant,
}

impl DeviceStateMachine {
    /// A machine for a freshly discovered device, starting `Online`.
    pub fn new() -> Self {
        Self {
            current_state: DeviceState::Online,
            state_entered_at: Instant::now(),
        }
    }

    pub fn current_state(&self) -> DeviceState {
        self.current_state
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Move to `new_state` if the transition is valid.
    ///
    /// # Errors
    /// Returns `Error::InvalidStateTransition` if the rules forbid it; the
    /// machine is left unchanged.
    pub fn transition_to(&mut self, new_state: DeviceState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.current_state = new_state;
        self.state_entered_at = transition.timestamp;
        Ok(transition)
    }
}

impl Default for DeviceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
