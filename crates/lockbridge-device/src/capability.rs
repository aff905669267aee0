//! Capability interface consumed by the accessory framework adapter.
//!
//! The adapter layer (outside this workspace) maps these calls onto its own
//! service and characteristic objects. Nothing here raises across that
//! boundary: every method returns a value, falling back to a benign default
//! when the cloud is unreachable.
//!
//! Changes flow the other way as [`BridgeEvent`]s on an mpsc channel.

#![allow(async_fn_in_trait)]

use lockbridge_core::{BatteryLevel, LockId, LockState};
use std::fmt;

/// What an accessory adapter can ask of one lock.
pub trait LockCapability {
    fn lock_id(&self) -> LockId;

    /// Last known bolt state.
    async fn get_state(&self) -> LockState;

    /// State most recently requested by the user.
    async fn get_target_state(&self) -> LockState;

    /// Request a bolt state. Writes are debounced; the last one wins.
    async fn set_state(&self, desired: LockState);

    async fn get_battery(&self) -> BatteryLevel;

    /// Base64 TLV8 list response for the current passcode snapshot.
    async fn list_passcodes(&self) -> String;

    /// Execute a base64 TLV8 access-code command and return the base64
    /// response. Malformed commands yield an empty response.
    async fn mutate_passcode(&self, command: &str) -> String;

    /// Ask the lock to identify itself.
    async fn identify(&self);

    /// `1` while an access-code mutation is executing, else `0`.
    fn configuration_state(&self) -> u8;
}

/// An attribute whose value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Attribute {
    CurrentState(LockState),
    TargetState(LockState),
    BatteryLevel(BatteryLevel),
    LowBattery(bool),
    ConfigurationState(u8),
    Reachable(bool),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentState(state) => write!(f, "current state {state}"),
            Self::TargetState(state) => write!(f, "target state {state}"),
            Self::BatteryLevel(level) => write!(f, "battery {level}"),
            Self::LowBattery(low) => write!(f, "low battery {low}"),
            Self::ConfigurationState(value) => write!(f, "configuration state {value}"),
            Self::Reachable(reachable) => write!(f, "reachable {reachable}"),
        }
    }
}

/// Notification pushed to the accessory framework.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BridgeEvent {
    /// A lock was discovered and registered.
    Added { lock_id: LockId, name: String },

    /// A lock was unregistered for good.
    Removed { lock_id: LockId },

    /// An attribute of a registered lock changed.
    Changed { lock_id: LockId, attribute: Attribute },
}
