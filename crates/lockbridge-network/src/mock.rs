//! Scripted cloud transport for testing and development.
//!
//! [`MockTransport`] answers requests per endpoint path. Replies come from
//! three sources, in order:
//!
//! 1. one-shot replies queued with [`MockTransport::push`]
//! 2. a handler installed with [`MockTransport::on`]
//! 3. a `404` reply
//!
//! Every call is recorded with the (possibly paused) tokio clock instant it
//! was made at, and the transport tracks the highest number of calls that
//! were in flight at once.
//!
//! # Examples
//!
//! ```
//! use lockbridge_network::mock::{MockReply, MockTransport};
//! use lockbridge_network::transport::{CloudRequest, CloudTransport, HttpMethod};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> lockbridge_core::Result<()> {
//!     let transport = MockTransport::new();
//!     transport.push("/v3/lock/queryElectricQuantity", MockReply::ok(json!({"electricQuantity": 77})));
//!
//!     let request = CloudRequest::new(HttpMethod::Get, "/v3/lock/queryElectricQuantity");
//!     let response = transport.send(&request).await?;
//!     assert_eq!(response.status, 200);
//!     assert_eq!(transport.call_count("/v3/lock/queryElectricQuantity"), 1);
//!     Ok(())
//! }
//! ```

use crate::transport::{CloudRequest, CloudResponse, CloudTransport};
use lockbridge_core::{Error, Result};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Handler producing a reply for a request.
pub type MockHandler = Arc<dyn Fn(&CloudRequest) -> MockReply + Send + Sync>;

/// A scripted reply.
#[derive(Debug, Clone)]
pub struct MockReply {
    outcome: MockOutcome,
    delay: Option<Duration>,
}

#[derive(Debug, Clone)]
enum MockOutcome {
    Response { status: u16, body: String },
    TransportError(String),
}

impl MockReply {
    /// `200` with a JSON body.
    pub fn ok(body: Value) -> Self {
        Self::status(200, body)
    }

    /// `200` with `{"errcode": 0}`.
    pub fn success() -> Self {
        Self::ok(json!({"errcode": 0, "errmsg": "none error message"}))
    }

    /// Arbitrary status with a JSON body.
    pub fn status(status: u16, body: Value) -> Self {
        Self {
            outcome: MockOutcome::Response {
                status,
                body: body.to_string(),
            },
            delay: None,
        }
    }

    /// Arbitrary status with a raw, possibly non-JSON body.
    pub fn raw(status: u16, body: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Response {
                status,
                body: body.into(),
            },
            delay: None,
        }
    }

    /// HTTP `401`.
    pub fn unauthorized() -> Self {
        Self::status(401, json!({"errcode": 10003, "errmsg": "invalid token"}))
    }

    /// Application-level "busy, try again" error.
    pub fn busy() -> Self {
        Self::error(-3003, "The gateway is busy. Please try again later.")
    }

    /// Application-level error with `errcode`/`errmsg`.
    pub fn error(errcode: i64, errmsg: &str) -> Self {
        Self::ok(json!({"errcode": errcode, "errmsg": errmsg}))
    }

    /// A failure to obtain any HTTP response.
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::TransportError(message.into()),
            delay: None,
        }
    }

    /// Simulated network latency before the reply is delivered.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A call observed by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: CloudRequest,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    queued: HashMap<String, VecDeque<MockReply>>,
    handlers: HashMap<String, MockHandler>,
    calls: Vec<RecordedCall>,
}

impl MockState {
    fn next_reply(&mut self, request: &CloudRequest) -> MockReply {
        if let Some(reply) = self
            .queued
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(handler) = self.handlers.get(&request.path) {
            return handler(request);
        }
        MockReply::status(
            404,
            json!({"errcode": 404, "errmsg": format!("no mock for {}", request.path)}),
        )
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Scripted transport. Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.calls().len())
            .field("max_in_flight", &self.max_in_flight())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking handler must not wedge every later call.
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a one-shot reply for `path`.
    pub fn push(&self, path: &str, reply: MockReply) {
        self.state()
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Install a handler answering every unscripted call to `path`.
    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&CloudRequest) -> MockReply + Send + Sync + 'static,
    {
        self.state()
            .handlers
            .insert(path.to_string(), Arc::new(handler));
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Recorded calls to one path.
    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.request.path == path)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.request.path == path)
            .count()
    }

    /// Highest number of calls observed in flight simultaneously.
    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl CloudTransport for MockTransport {
    async fn send(&self, request: &CloudRequest) -> Result<CloudResponse> {
        let in_flight = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let reply = {
            let mut state = self.state();
            state.calls.push(RecordedCall {
                request: request.clone(),
                at: Instant::now(),
            });
            state.next_reply(request)
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply.outcome {
            MockOutcome::Response { status, body } => Ok(CloudResponse { status, body }),
            MockOutcome::TransportError(message) => Err(Error::Transport(message)),
        }
    }
}
