//! Serialized request queue with token refresh and busy backoff.
//!
//! Every cloud call from every device goes through one [`RequestQueue`]. A
//! single worker task drains it in FIFO order, so at most one call is in
//! flight at any instant. The cloud rate-limits aggressively and this is
//! the throttle.
//!
//! ```text
//! DeviceCoordinator ─┐
//! DeviceCoordinator ─┼─> RequestQueue (mpsc) ─> worker ─> RetryExecutor ─> CloudTransport
//! LockPlatform ──────┘        ^                                 │
//!                             └──── oneshot result ─────────────┘
//! ```
//!
//! [`RetryExecutor`] classifies each response:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | HTTP 401 | refresh the session once, replay (retry budget untouched) |
//! | busy / "try again" | sleep `2^retry` s and replay, at most 3 times |
//! | other errcode, bad shape | fail with `RequestFailed` |
//! | `errcode == 0` | resolve with the decoded body |
//!
//! A failed request only fails its own caller; the worker moves on.

use crate::session::SessionClient;
use crate::transport::{AnyTransport, CloudRequest, CloudResponse, CloudTransport, HttpMethod};
use lockbridge_core::constants::{
    BACKOFF_BASE_SECS, ERRCODE_GATEWAY_BUSY, MAX_REFRESHES_PER_REQUEST, MAX_TRANSIENT_RETRIES,
    REQUEST_QUEUE_CAPACITY,
};
use lockbridge_core::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Form parameters of a queued call.
pub type Params = Vec<(String, String)>;

struct QueuedRequest {
    endpoint: String,
    method: HttpMethod,
    params: Params,
    responder: oneshot::Sender<Result<Value>>,
}

/// Classified response.
enum Outcome {
    Success(Value),
    Transient(String),
    Failed(Error),
}

/// Executes one request to completion: auth parameters, refresh on 401,
/// backoff on busy.
pub struct RetryExecutor {
    session: Arc<SessionClient>,
    transport: AnyTransport,
    max_retries: u32,
}

impl RetryExecutor {
    pub fn new(session: Arc<SessionClient>, transport: impl Into<AnyTransport>) -> Self {
        Self {
            session,
            transport: transport.into(),
            max_retries: MAX_TRANSIENT_RETRIES,
        }
    }

    /// Run `endpoint` until it succeeds or fails for good.
    ///
    /// # Errors
    /// - `Error::Authentication` if there is no session or the refresh fails
    /// - `Error::TokenExpired` if the call is still unauthorized after a refresh
    /// - `Error::TransientService` once the busy retries are exhausted
    /// - `Error::RequestFailed` for any other application error
    /// - `Error::Transport` if no response could be obtained
    pub async fn execute(&self, endpoint: &str, method: HttpMethod, params: &Params) -> Result<Value> {
        let mut retries: u32 = 0;
        let mut refreshes: u32 = 0;

        loop {
            let token = self
                .session
                .access_token()
                .ok_or_else(|| Error::authentication("not authenticated"))?;
            let request = self.build(endpoint, method, params, &token);

            trace!(endpoint, attempt = retries + 1, "Executing cloud request");
            let response = self.transport.send(&request).await?;

            if response.status == 401 {
                if refreshes >= MAX_REFRESHES_PER_REQUEST {
                    warn!(endpoint, "Still unauthorized after token refresh");
                    return Err(Error::TokenExpired);
                }
                refreshes += 1;
                debug!(endpoint, "Unauthorized, refreshing session");
                self.session.refresh_if_stale(&token).await?;
                continue;
            }

            match classify(endpoint, response) {
                Outcome::Success(body) => return Ok(body),
                Outcome::Failed(e) => return Err(e),
                Outcome::Transient(message) => {
                    if retries >= self.max_retries {
                        warn!(endpoint, attempts = retries + 1, %message, "Cloud still busy, giving up");
                        return Err(Error::TransientService {
                            endpoint: endpoint.to_string(),
                            attempts: retries + 1,
                        });
                    }
                    let delay = backoff_delay(retries);
                    retries += 1;
                    debug!(endpoint, retry = retries, delay_secs = delay.as_secs(), %message, "Cloud busy, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn build(&self, endpoint: &str, method: HttpMethod, params: &Params, token: &str) -> CloudRequest {
        let mut request = CloudRequest::new(method, endpoint)
            .param("clientId", self.session.client_id())
            .param("accessToken", token)
            .param("date", chrono::Utc::now().timestamp_millis());
        request.params.extend(params.iter().cloned());
        request.bearer = Some(token.to_string());
        request
    }
}

/// Delay before retry number `retry + 1`: 1 s, 2 s, 4 s, ...
pub fn backoff_delay(retry: u32) -> Duration {
    Duration::from_secs(BACKOFF_BASE_SECS.saturating_pow(retry))
}

/// Whether an application error is the cloud's "busy, try again" signal.
pub fn is_transient_error(errcode: i64, errmsg: &str) -> bool {
    let message = errmsg.to_ascii_lowercase();
    errcode == ERRCODE_GATEWAY_BUSY || message.contains("try again") || message.contains("busy")
}

fn classify(endpoint: &str, response: CloudResponse) -> Outcome {
    let failed = |errcode: Option<i64>, body: String| {
        Outcome::Failed(Error::RequestFailed {
            endpoint: endpoint.to_string(),
            status: response.status,
            errcode,
            body,
        })
    };

    let value: Value = match serde_json::from_str(&response.body) {
        Ok(value @ Value::Object(_)) => value,
        _ => return failed(None, response.body.clone()),
    };

    // A success body may omit errcode entirely.
    let errcode = value.get("errcode").and_then(Value::as_i64).unwrap_or(0);
    let errmsg = value
        .get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if errcode != 0 && is_transient_error(errcode, errmsg) {
        return Outcome::Transient(errmsg.to_string());
    }
    if errcode != 0 || !(200..300).contains(&response.status) {
        return failed(Some(errcode), response.body.clone());
    }
    Outcome::Success(value)
}

/// Handle to the shared request queue. Clones feed the same worker.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    sender: mpsc::Sender<QueuedRequest>,
}

impl RequestQueue {
    /// Spawn the worker. It runs until every queue handle is dropped.
    pub fn start(executor: RetryExecutor) -> Self {
        let (sender, receiver) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        tokio::spawn(Self::worker(executor, receiver));
        Self { sender }
    }

    /// Queue a call and wait for its result.
    ///
    /// # Errors
    /// Returns the call's own error, or `Error::QueueClosed` if the worker
    /// has stopped.
    pub async fn enqueue(&self, endpoint: &str, method: HttpMethod, params: Params) -> Result<Value> {
        let (responder, result) = oneshot::channel();
        self.sender
            .send(QueuedRequest {
                endpoint: endpoint.to_string(),
                method,
                params,
                responder,
            })
            .await
            .map_err(|_| Error::QueueClosed)?;
        result.await.map_err(|_| Error::QueueClosed)?
    }

    async fn worker(executor: RetryExecutor, mut receiver: mpsc::Receiver<QueuedRequest>) {
        debug!("Request queue worker started");
        while let Some(request) = receiver.recv().await {
            let result = executor
                .execute(&request.endpoint, request.method, &request.params)
                .await;
            if let Err(e) = &result {
                debug!(endpoint = %request.endpoint, error = %e, "Queued request failed");
            }
            if request.responder.send(result).is_err() {
                trace!(endpoint = %request.endpoint, "Caller went away before the result");
            }
        }
        debug!("Request queue worker stopped");
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}
