//! Per-lock lifecycle coordinator.
//!
//! A [`DeviceCoordinator`] owns one lock's snapshot and is its only writer.
//! It runs three kinds of work, never two at once (see [`OperationGate`]):
//!
//! - **Polling**: every polling interval, read the battery and, unless a user
//!   changed the state in the last 5 s, the bolt state. Only attributes whose
//!   value changed are notified.
//! - **Debounced writes**: `set_state` restarts a 500 ms timer; when it fires,
//!   the last requested state is sent to the cloud.
//! - **Access-code commands**: executed through [`AccessCodeExecutor`].
//!
//! Any cloud fault during a poll or write moves the lock `Offline` and stops
//! its polling. [`reconnect`](DeviceCoordinator::reconnect) brings it back.

use crate::access_code::{self, AccessCodeExecutor};
use crate::capability::{Attribute, BridgeEvent, LockCapability};
use crate::gate::OperationGate;
use crate::state_machine::{DeviceState, DeviceStateMachine};
use lockbridge_core::constants::{STATE_POLL_SUPPRESSION_SECS, WRITE_DEBOUNCE_MS};
use lockbridge_core::{BatteryLevel, Error, Lock, LockId, LockState, Result};
use lockbridge_network::LockCloudGateway;
use lockbridge_protocol::access_code::{
    AccessCodeOperation, AccessCodeRequest, AccessCodeResponse, empty_response_base64,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Timing knobs for one coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub polling_interval: Duration,
    pub write_debounce: Duration,
    pub poll_suppression: Duration,
}

impl CoordinatorConfig {
    pub fn new(polling_interval: Duration) -> Self {
        Self {
            polling_interval,
            write_debounce: Duration::from_millis(WRITE_DEBOUNCE_MS),
            poll_suppression: Duration::from_secs(STATE_POLL_SUPPRESSION_SECS),
        }
    }
}

struct Inner {
    lock_id: LockId,
    gateway: LockCloudGateway,
    access_codes: AccessCodeExecutor,
    config: CoordinatorConfig,
    snapshot: Mutex<Lock>,
    lifecycle: Mutex<DeviceStateMachine>,
    target: Mutex<LockState>,
    last_user_change: Mutex<Option<Instant>>,
    write_generation: AtomicU64,
    gate: OperationGate,
    events: mpsc::Sender<BridgeEvent>,
    shutdown: CancellationToken,
    polling: Mutex<Option<CancellationToken>>,
    tracker: TaskTracker,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinator for one lock. Clones share the same lock.
#[derive(Clone)]
pub struct DeviceCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DeviceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCoordinator")
            .field("lock_id", &self.inner.lock_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DeviceCoordinator {
    /// Create a coordinator for a freshly discovered lock.
    ///
    /// Tasks are spawned on `tracker` and stop when `shutdown` is cancelled.
    pub fn new(
        lock: Lock,
        gateway: LockCloudGateway,
        config: CoordinatorConfig,
        events: mpsc::Sender<BridgeEvent>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        let lock_id = lock.id;
        let target = lock.state;
        Self {
            inner: Arc::new(Inner {
                lock_id,
                access_codes: AccessCodeExecutor::new(lock_id, gateway.clone()),
                gateway,
                config,
                snapshot: Mutex::new(lock),
                lifecycle: Mutex::new(DeviceStateMachine::new()),
                target: Mutex::new(target),
                last_user_change: Mutex::new(None),
                write_generation: AtomicU64::new(0),
                gate: OperationGate::new(),
                events,
                shutdown,
                polling: Mutex::new(None),
                tracker,
            }),
        }
    }

    pub fn state(&self) -> DeviceState {
        locked(&self.inner.lifecycle).current_state()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Lock {
        locked(&self.inner.snapshot).clone()
    }

    /// Whether a polling task is active.
    pub fn is_polling(&self) -> bool {
        locked(&self.inner.polling).is_some()
    }

    /// How long the lock has been in its current lifecycle state.
    fn time_in_state(&self) -> Duration {
        locked(&self.inner.lifecycle).time_in_current_state()
    }

    /// Start the polling timer. The first poll happens one interval from now.
    pub fn start(&self) {
        let mut polling = locked(&self.inner.polling);
        if polling.is_some() {
            return;
        }
        let cancel = self.inner.shutdown.child_token();
        *polling = Some(cancel.clone());
        drop(polling);

        debug!(lock_id = %self.inner.lock_id, interval = ?self.inner.config.polling_interval, "Polling started");
        self.inner
            .tracker
            .spawn(Self::poll_loop(Arc::clone(&self.inner), cancel));
    }

    fn stop_polling(&self) {
        if let Some(cancel) = locked(&self.inner.polling).take() {
            cancel.cancel();
            debug!(lock_id = %self.inner.lock_id, "Polling stopped");
        }
    }

    async fn poll_loop(inner: Arc<Inner>, cancel: CancellationToken) {
        let coordinator = DeviceCoordinator { inner };
        let period = coordinator.inner.config.polling_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = coordinator.poll_once().await {
                        coordinator.go_offline(&e).await;
                        break;
                    }
                }
            }
        }
        trace!(lock_id = %coordinator.inner.lock_id, "Poll loop exited");
    }

    fn state_read_suppressed(&self) -> bool {
        locked(&self.inner.last_user_change)
            .is_some_and(|at| at.elapsed() <= self.inner.config.poll_suppression)
    }

    /// Refresh battery and, unless suppressed, bolt state from the cloud.
    ///
    /// # Errors
    /// Returns the gateway error; the caller decides whether to go offline.
    pub async fn poll_once(&self) -> Result<()> {
        let _permit = self.inner.gate.acquire().await;
        if self.state() != DeviceState::Online {
            return Ok(());
        }
        let lock_id = self.inner.lock_id;

        let battery = self.inner.gateway.get_battery_level(lock_id).await?;
        let state = if self.state_read_suppressed() {
            trace!(%lock_id, "Recent user change, skipping state read");
            None
        } else {
            Some(self.inner.gateway.get_lock_state(lock_id).await?)
        };

        let mut changes = Vec::new();
        {
            let mut snapshot = locked(&self.inner.snapshot);
            if snapshot.battery != battery {
                changes.push(Attribute::BatteryLevel(battery));
                if snapshot.battery.is_low() != battery.is_low() {
                    changes.push(Attribute::LowBattery(battery.is_low()));
                }
                snapshot.battery = battery;
            }
            if let Some(state) = state
                && snapshot.state != state
            {
                changes.push(Attribute::CurrentState(state));
                snapshot.state = state;
            }
            snapshot.last_seen = chrono::Utc::now();
        }

        if let Some(state) = state
            && state.is_target()
        {
            let mut target = locked(&self.inner.target);
            if *target != state {
                *target = state;
                changes.push(Attribute::TargetState(state));
            }
        }

        for change in changes {
            self.emit(change).await;
        }
        Ok(())
    }

    /// Accept a user write. Only the last write within the debounce window
    /// reaches the cloud.
    pub async fn request_state(&self, desired: LockState) {
        if !desired.is_target() {
            warn!(lock_id = %self.inner.lock_id, "Ignoring request for unknown state");
            return;
        }

        let changed = {
            let mut target = locked(&self.inner.target);
            let changed = *target != desired;
            *target = desired;
            changed
        };
        *locked(&self.inner.last_user_change) = Some(Instant::now());
        if changed {
            self.emit(Attribute::TargetState(desired)).await;
        }

        let generation = self.inner.write_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let coordinator = self.clone();
        let cancel = self.inner.shutdown.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(coordinator.inner.config.write_debounce) => {
                    if coordinator.inner.write_generation.load(Ordering::SeqCst) == generation {
                        coordinator.apply_write(desired).await;
                    } else {
                        trace!(lock_id = %coordinator.inner.lock_id, "Write superseded");
                    }
                }
            }
        });
    }

    async fn apply_write(&self, desired: LockState) {
        let _permit = self.inner.gate.acquire().await;
        let lock_id = self.inner.lock_id;

        if let Err(e) = self.transition(DeviceState::Updating) {
            warn!(%lock_id, error = %e, "Lock not writable, dropping state change");
            return;
        }

        let result = match desired {
            LockState::Secured => self.inner.gateway.lock(lock_id).await,
            _ => self.inner.gateway.unlock(lock_id).await,
        };

        match result {
            Ok(()) => {
                *locked(&self.inner.last_user_change) = Some(Instant::now());
                let changed = {
                    let mut snapshot = locked(&self.inner.snapshot);
                    let changed = snapshot.state != desired;
                    snapshot.state = desired;
                    changed
                };
                let _ = self.transition(DeviceState::Online);
                if changed {
                    self.emit(Attribute::CurrentState(desired)).await;
                }
                info!(%lock_id, state = %desired, "Lock state applied");
            }
            Err(e) => self.go_offline(&e).await,
        }
    }

    /// Run an access-code command. Always answers; failures yield an empty
    /// response.
    pub async fn handle_access_code(&self, command: &str) -> String {
        let lock_id = self.inner.lock_id;
        let request = match AccessCodeRequest::from_base64(command) {
            Ok(request) => request,
            Err(e) => {
                warn!(%lock_id, error = %e, "Malformed access code command");
                return empty_response_base64();
            }
        };

        if !request.operation.is_mutation() {
            let mut passcodes = locked(&self.inner.snapshot).passcodes.clone();
            return match self.inner.access_codes.execute(&request, &mut passcodes).await {
                Ok(response) => response.to_base64(),
                Err(e) => {
                    warn!(%lock_id, error = %e, "Access code command rejected");
                    empty_response_base64()
                }
            };
        }

        let _permit = self.inner.gate.acquire().await;
        if let Err(e) = self.transition(DeviceState::Updating) {
            warn!(%lock_id, error = %e, "Lock not writable, ignoring access code change");
            return empty_response_base64();
        }

        let access_codes = &self.inner.access_codes;
        let busy = access_codes.mark_busy();
        self.emit(Attribute::ConfigurationState(access_codes.configuration_state()))
            .await;
        let mut passcodes = locked(&self.inner.snapshot).passcodes.clone();
        let result = access_codes.execute(&request, &mut passcodes).await;
        drop(busy);
        self.emit(Attribute::ConfigurationState(access_codes.configuration_state()))
            .await;

        match result {
            Ok(response) => {
                locked(&self.inner.snapshot).replace_passcodes(passcodes);
                let _ = self.transition(DeviceState::Online);
                response.to_base64()
            }
            Err(e @ Error::ProtocolDecode(_)) => {
                // Rejected before any cloud call.
                let _ = self.transition(DeviceState::Online);
                warn!(%lock_id, error = %e, "Access code command rejected");
                empty_response_base64()
            }
            Err(e) => {
                self.go_offline(&e).await;
                empty_response_base64()
            }
        }
    }

    /// Move to `Offline` and stop polling.
    async fn go_offline(&self, error: &Error) {
        let lock_id = self.inner.lock_id;
        if let Err(e) = self.transition(DeviceState::Offline) {
            debug!(%lock_id, error = %e, "Offline transition skipped");
            return;
        }
        warn!(%lock_id, %error, "Lock unreachable, marked offline");
        self.stop_polling();
        locked(&self.inner.snapshot).offline = true;
        self.emit(Attribute::Reachable(false)).await;
    }

    /// Bring an `Offline` lock back online and resume polling.
    ///
    /// The passcode snapshot is refetched first: a mutation that failed
    /// part-way may have changed the cloud listing.
    ///
    /// # Errors
    /// Returns `Error::InvalidStateTransition` if the lock is not offline, or
    /// the gateway error if the listing fails (the lock stays offline).
    pub async fn reconnect(&self) -> Result<()> {
        let lock_id = self.inner.lock_id;
        if self.state() != DeviceState::Offline {
            return Err(Error::InvalidStateTransition {
                from: self.state().to_string(),
                to: DeviceState::Online.to_string(),
            });
        }

        let _permit = self.inner.gate.acquire().await;
        let passcodes = self.inner.gateway.get_passcodes(lock_id).await?;
        let offline_for = self.time_in_state();
        self.transition(DeviceState::Online)?;
        {
            let mut snapshot = locked(&self.inner.snapshot);
            snapshot.replace_passcodes(passcodes);
            snapshot.offline = false;
            snapshot.last_seen = chrono::Utc::now();
        }
        info!(%lock_id, ?offline_for, "Lock back online");
        self.emit(Attribute::Reachable(true)).await;
        self.start();
        Ok(())
    }

    /// Record that a discovery sweep saw this lock.
    pub fn mark_seen(&self) {
        locked(&self.inner.snapshot).last_seen = chrono::Utc::now();
    }

    /// Unregister for good. Polling stops and pending writes are dropped.
    ///
    /// # Errors
    /// Returns `Error::InvalidStateTransition` while an update is executing
    /// or if already removed.
    pub fn remove(&self) -> Result<()> {
        self.transition(DeviceState::Removed)?;
        self.stop_polling();
        self.inner.write_generation.fetch_add(1, Ordering::SeqCst);
        info!(lock_id = %self.inner.lock_id, "Lock removed");
        Ok(())
    }

    fn transition(&self, state: DeviceState) -> Result<()> {
        let transition = locked(&self.inner.lifecycle).transition_to(state)?;
        trace!(lock_id = %self.inner.lock_id, from = %transition.from, to = %transition.to, "Lifecycle transition");
        Ok(())
    }

    async fn emit(&self, attribute: Attribute) {
        let lock_id = self.inner.lock_id;
        debug!(%lock_id, %attribute, "Attribute changed");
        if self
            .inner
            .events
            .send(BridgeEvent::Changed { lock_id, attribute })
            .await
            .is_err()
        {
            trace!(%lock_id, "Event receiver dropped");
        }
    }
}

impl LockCapability for DeviceCoordinator {
    fn lock_id(&self) -> LockId {
        self.inner.lock_id
    }

    async fn get_state(&self) -> LockState {
        locked(&self.inner.snapshot).state
    }

    async fn get_target_state(&self) -> LockState {
        *locked(&self.inner.target)
    }

    async fn set_state(&self, desired: LockState) {
        self.request_state(desired).await;
    }

    async fn get_battery(&self) -> BatteryLevel {
        locked(&self.inner.snapshot).battery
    }

    async fn list_passcodes(&self) -> String {
        let snapshot = locked(&self.inner.snapshot);
        AccessCodeResponse::new(
            AccessCodeOperation::List,
            access_code::list_records(&snapshot.passcodes),
        )
        .to_base64()
    }

    async fn mutate_passcode(&self, command: &str) -> String {
        self.handle_access_code(command).await
    }

    async fn identify(&self) {
        let snapshot = locked(&self.inner.snapshot);
        info!(lock_id = %snapshot.id, name = %snapshot.name, "Identify requested");
    }

    fn configuration_state(&self) -> u8 {
        self.inner.access_codes.configuration_state()
    }
}
