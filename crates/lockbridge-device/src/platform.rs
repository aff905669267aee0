//! Lock registry and discovery sweeps.
//!
//! [`LockPlatform`] periodically lists the account's locks and keeps one
//! [`DeviceCoordinator`] per lock:
//!
//! - a new lock is fetched in full, registered and starts polling
//! - an `Offline` lock seen again is reconnected
//! - a lock absent from sweeps for longer than the offline interval is
//!   removed, and its id is remembered so it is never registered again
//!
//! ```text
//!            ┌──────────────┐  Added/Removed/Changed  ┌─────────────────────┐
//! sweep ───> │ LockPlatform │ ──────(mpsc)──────────> │ accessory adapter   │
//!            └──────┬───────┘                         └─────────────────────┘
//!                   │ one per lock
//!                   v
//!           DeviceCoordinator ... DeviceCoordinator
//! ```

use crate::capability::BridgeEvent;
use crate::coordinator::{CoordinatorConfig, DeviceCoordinator};
use crate::state_machine::DeviceState;
use lockbridge_core::constants::EVENT_CHANNEL_CAPACITY;
use lockbridge_core::{BridgeConfig, LockId, Result};
use lockbridge_network::LockCloudGateway;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Intervals driving the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformConfig {
    pub polling_interval: Duration,
    pub discovery_interval: Duration,
    pub offline_interval: Duration,
}

impl From<&BridgeConfig> for PlatformConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            polling_interval: config.polling_interval(),
            discovery_interval: config.discovery_interval(),
            offline_interval: config.offline_interval(),
        }
    }
}

/// Outcome of one discovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub added: Vec<LockId>,
    pub reconnected: Vec<LockId>,
    pub removed: Vec<LockId>,
}

struct Registered {
    coordinator: DeviceCoordinator,
    last_seen: Instant,
}

/// Registry of coordinated locks.
pub struct LockPlatform {
    gateway: LockCloudGateway,
    config: PlatformConfig,
    devices: Mutex<HashMap<LockId, Registered>>,
    removed: Mutex<HashSet<LockId>>,
    events: mpsc::Sender<BridgeEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for LockPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockPlatform")
            .field("config", &self.config)
            .field("devices", &self.lock_ids())
            .finish_non_exhaustive()
    }
}

impl LockPlatform {
    /// Create a platform and the receiving end of its event channel.
    pub fn new(
        gateway: LockCloudGateway,
        config: PlatformConfig,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let platform = Self {
            gateway,
            config,
            devices: Mutex::new(HashMap::new()),
            removed: Mutex::new(HashSet::new()),
            events,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        (platform, receiver)
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<LockId, Registered>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn removed(&self) -> MutexGuard<'_, HashSet<LockId>> {
        self.removed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ids of registered locks, sorted.
    pub fn lock_ids(&self) -> Vec<LockId> {
        let mut ids: Vec<LockId> = self.devices().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn coordinator(&self, lock_id: LockId) -> Option<DeviceCoordinator> {
        self.devices().get(&lock_id).map(|r| r.coordinator.clone())
    }

    /// Whether `lock_id` was removed and will not be registered again.
    pub fn is_removed(&self, lock_id: LockId) -> bool {
        self.removed().contains(&lock_id)
    }

    /// Token cancelled when the platform shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one discovery sweep.
    ///
    /// # Errors
    /// Returns the gateway error if the lock listing fails. Failures to fetch
    /// an individual new lock are logged and retried on the next sweep.
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let summaries = self.gateway.get_locks().await?;
        let now = Instant::now();
        let mut report = DiscoveryReport::default();
        let mut seen = HashSet::new();

        for summary in summaries {
            let lock_id = summary.id;
            if self.is_removed(lock_id) {
                debug!(%lock_id, "Ignoring removed lock");
                continue;
            }
            seen.insert(lock_id);

            let existing = self.devices().get_mut(&lock_id).map(|registered| {
                registered.last_seen = now;
                registered.coordinator.clone()
            });

            match existing {
                Some(coordinator) => {
                    coordinator.mark_seen();
                    if coordinator.state() == DeviceState::Offline {
                        match coordinator.reconnect().await {
                            Ok(()) => report.reconnected.push(lock_id),
                            Err(e) => warn!(%lock_id, error = %e, "Reconnect failed"),
                        }
                    }
                }
                None => match self.register(lock_id, now).await {
                    Ok(()) => report.added.push(lock_id),
                    Err(e) => warn!(%lock_id, error = %e, "Could not register lock, retrying next sweep"),
                },
            }
        }

        let expired: Vec<(LockId, DeviceCoordinator)> = self
            .devices()
            .iter()
            .filter(|(id, registered)| {
                !seen.contains(*id)
                    && now.duration_since(registered.last_seen) > self.config.offline_interval
            })
            .map(|(id, registered)| (*id, registered.coordinator.clone()))
            .collect();

        for (lock_id, coordinator) in expired {
            if let Err(e) = coordinator.remove() {
                debug!(%lock_id, error = %e, "Removal deferred");
                continue;
            }
            self.devices().remove(&lock_id);
            self.removed().insert(lock_id);
            report.removed.push(lock_id);
            self.emit(BridgeEvent::Removed { lock_id }).await;
        }

        info!(
            added = report.added.len(),
            reconnected = report.reconnected.len(),
            removed = report.removed.len(),
            registered = self.devices().len(),
            "Discovery sweep complete"
        );
        Ok(report)
    }

    async fn register(&self, lock_id: LockId, now: Instant) -> Result<()> {
        let lock = self.gateway.fetch_lock(lock_id).await?;
        let name = lock.name.clone();
        let coordinator = DeviceCoordinator::new(
            lock,
            self.gateway.clone(),
            CoordinatorConfig::new(self.config.polling_interval),
            self.events.clone(),
            self.shutdown.child_token(),
            self.tracker.clone(),
        );
        coordinator.start();

        self.devices().insert(
            lock_id,
            Registered {
                coordinator,
                last_seen: now,
            },
        );
        info!(%lock_id, %name, "Lock registered");
        self.emit(BridgeEvent::Added { lock_id, name }).await;
        Ok(())
    }

    async fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }

    /// Sweep immediately, then every discovery interval, until shutdown.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.discovery_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.config.discovery_interval, "Discovery started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.discover().await {
                        Ok(_) => {}
                        Err(e) if e.is_terminal() => {
                            error!(error = %e, "Discovery sweep failed, session unusable");
                        }
                        Err(e) if e.is_transient() => {
                            info!(error = %e, "Cloud busy, discovery retried next sweep");
                        }
                        Err(e) => warn!(error = %e, "Discovery sweep failed"),
                    }
                }
            }
        }
        info!("Discovery stopped");
    }

    /// Stop all new work and wait for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        info!(devices = self.devices().len(), "Shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Shutdown complete");
    }
}
