//! Device-side runtime of the lock bridge.
//!
//! # Components
//!
//! - [`capability`]: the [`LockCapability`] interface and [`BridgeEvent`] notifications
//! - [`coordinator`]: [`DeviceCoordinator`], polling, debounced writes, offline handling
//! - [`access_code`]: [`AccessCodeExecutor`], passcode commands against the cloud
//! - [`gate`]: [`OperationGate`], one operation per device at a time
//! - [`state_machine`]: [`DeviceStateMachine`], Online/Updating/Offline/Removed
//! - [`platform`]: [`LockPlatform`], discovery sweeps and shutdown

pub mod access_code;
pub mod capability;
pub mod coordinator;
pub mod gate;
pub mod platform;
pub mod state_machine;

pub use access_code::AccessCodeExecutor;
pub use capability::{Attribute, BridgeEvent, LockCapability};
pub use coordinator::{CoordinatorConfig, DeviceCoordinator};
pub use gate::{GatePermit, OperationGate};
pub use platform::{DiscoveryReport, LockPlatform, PlatformConfig};
pub use state_machine::{DeviceState, DeviceStateMachine, StateTransition};
