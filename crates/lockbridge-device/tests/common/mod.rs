//! A stateful fake of the lock cloud built on `MockTransport` handlers.

#![allow(dead_code)]

use lockbridge_core::LockId;
use lockbridge_core::constants::*;
use lockbridge_device::{BridgeEvent, CoordinatorConfig, DeviceCoordinator};
use lockbridge_network::mock::{MockReply, MockTransport};
use lockbridge_network::{LockCloudGateway, RequestQueue, RetryExecutor, SessionClient};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const LOCK: LockId = LockId::new(4242);

#[derive(Debug)]
pub struct CloudState {
    pub present: bool,
    pub open_state: i64,
    pub battery: i64,
    pub passcodes: Vec<(i64, String)>,
    pub next_id: i64,
    pub failing: bool,
    /// List passcodes most recent first, so an add shifts every slot.
    pub newest_first: bool,
}

#[derive(Clone)]
pub struct FakeCloud {
    pub mock: MockTransport,
    pub state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    pub fn new(passcodes: &[&str]) -> Self {
        let state = Arc::new(Mutex::new(CloudState {
            present: true,
            open_state: 0,
            battery: 80,
            passcodes: passcodes
                .iter()
                .enumerate()
                .map(|(i, code)| (100 + i as i64, code.to_string()))
                .collect(),
            next_id: 100 + passcodes.len() as i64,
            failing: false,
            newest_first: false,
        }));
        let mock = MockTransport::new();
        let cloud = Self { mock, state };
        cloud.install();
        cloud
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut CloudState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn install(&self) {
        let mock = &self.mock;
        mock.on(PATH_OAUTH_TOKEN, |_| {
            MockReply::ok(json!({"access_token": "a1", "refresh_token": "r1"}))
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_LOCK_LIST, move |_| {
            let state = state.lock().unwrap();
            let list = if state.present {
                vec![json!({"lockId": LOCK.as_i64(), "lockAlias": "Front door", "electricQuantity": state.battery})]
            } else {
                Vec::new()
            };
            MockReply::ok(json!({"list": list}))
        });

        mock.on(PATH_LOCK_DETAIL, |_| {
            MockReply::ok(json!({
                "lockId": LOCK.as_i64(),
                "lockAlias": "Front door",
                "lockMac": "AA:BB:CC:DD:EE:FF",
                "modelNum": "SN9161",
                "hardwareRevision": "1.0",
                "firmwareRevision": "6.0",
                "electricQuantity": 80
            }))
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_LOCK_OPEN_STATE, move |_| {
            let state = state.lock().unwrap();
            if state.failing {
                return MockReply::error(-2012, "lock is not connected to gateway");
            }
            MockReply::ok(json!({"state": state.open_state}))
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_LOCK_BATTERY, move |_| {
            let state = state.lock().unwrap();
            if state.failing {
                return MockReply::error(-2012, "lock is not connected to gateway");
            }
            MockReply::ok(json!({"electricQuantity": state.battery}))
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_LOCK_LOCK, move |_| {
            let mut state = state.lock().unwrap();
            if state.failing {
                return MockReply::error(-2012, "lock is not connected to gateway");
            }
            state.open_state = 0;
            MockReply::success()
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_LOCK_UNLOCK, move |_| {
            let mut state = state.lock().unwrap();
            if state.failing {
                return MockReply::error(-2012, "lock is not connected to gateway");
            }
            state.open_state = 1;
            MockReply::success()
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_PASSCODE_LIST, move |_| {
            let state = state.lock().unwrap();
            let mut list: Vec<_> = state
                .passcodes
                .iter()
                .map(|(id, code)| json!({"keyboardPwdId": id, "keyboardPwd": code}))
                .collect();
            if state.newest_first {
                list.reverse();
            }
            MockReply::ok(json!({"list": list}))
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_PASSCODE_ADD, move |request| {
            let mut state = state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            let code = request.get("keyboardPwd").unwrap_or_default().to_string();
            state.passcodes.push((id, code));
            MockReply::ok(json!({"keyboardPwdId": id}))
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_PASSCODE_CHANGE, move |request| {
            let mut state = state.lock().unwrap();
            let id: i64 = request.get("keyboardPwdId").unwrap_or("0").parse().unwrap();
            let code = request.get("newKeyboardPwd").unwrap_or_default().to_string();
            if let Some(entry) = state.passcodes.iter_mut().find(|(pid, _)| *pid == id) {
                entry.1 = code;
            }
            MockReply::success()
        });

        let state = Arc::clone(&self.state);
        mock.on(PATH_PASSCODE_DELETE, move |request| {
            let mut state = state.lock().unwrap();
            let id: i64 = request.get("keyboardPwdId").unwrap_or("0").parse().unwrap();
            state.passcodes.retain(|(pid, _)| *pid != id);
            MockReply::success()
        });

        mock.on(PATH_CARD_LIST, |_| MockReply::ok(json!({"list": []})));
    }

    pub async fn gateway(&self) -> LockCloudGateway {
        let session = Arc::new(SessionClient::new(self.mock.clone(), "cid", "secret"));
        session.authenticate("u", "p").await.unwrap();
        let queue = RequestQueue::start(RetryExecutor::new(session, self.mock.clone()));
        LockCloudGateway::new(queue)
    }
}

pub struct Harness {
    pub cloud: FakeCloud,
    pub coordinator: DeviceCoordinator,
    pub events: mpsc::Receiver<BridgeEvent>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

/// A coordinator for `LOCK` with the given passcodes, not yet polling.
pub async fn harness(passcodes: &[&str], polling_interval: Duration) -> Harness {
    harness_on(FakeCloud::new(passcodes), CoordinatorConfig::new(polling_interval)).await
}

/// A coordinator for `LOCK` on a prepared cloud, not yet polling.
pub async fn harness_on(cloud: FakeCloud, config: CoordinatorConfig) -> Harness {
    let gateway = cloud.gateway().await;
    let lock = gateway.fetch_lock(LOCK).await.unwrap();
    let (tx, events) = mpsc::channel(100);
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let coordinator = DeviceCoordinator::new(
        lock,
        gateway,
        config,
        tx,
        shutdown.clone(),
        tracker.clone(),
    );
    Harness {
        cloud,
        coordinator,
        events,
        shutdown,
        tracker,
    }
}

/// Every event currently buffered.
pub fn drain(events: &mut mpsc::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
